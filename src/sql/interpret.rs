//! The nested-statement walker.
//!
//! Evaluates a statement document against the datasource in scope, streaming
//! the template back out with parameter placeholders replaced by evaluated
//! column and path values. Template elements outside the `sql:` prefix are
//! copied through untouched.

use crate::context::ExecutionContext;
use crate::core::{PipeError, Result, Value};
use crate::graph::{
    PortInfo, Processor, ProcessorBase, Validity, PORT_CONFIG, PORT_DATA,
};
use crate::path::{self, PathExpr};
use crate::sql::context::{FrameState, InterpreterContext, SqlRuntime};
use crate::xml::{Content, Element, EventSink, Tree, XmlEvent};

const SQL_PREFIX: &str = "sql:";

/// Output wrapper that defers each element start until its first content,
/// so `sql:attribute` can still attach attributes to it.
pub struct DeferredSink<'a> {
    sink: &'a mut dyn EventSink,
    pending: Option<(String, Vec<(String, String)>)>,
}

impl<'a> DeferredSink<'a> {
    pub fn new(sink: &'a mut dyn EventSink) -> Self {
        Self {
            sink,
            pending: None,
        }
    }

    fn flush(&mut self) -> Result<()> {
        if let Some((name, attributes)) = self.pending.take() {
            self.sink.event(&XmlEvent::StartElement { name, attributes })?;
        }
        Ok(())
    }

    fn start_element(&mut self, name: &str, attributes: &[(String, String)]) -> Result<()> {
        self.flush()?;
        self.pending = Some((name.to_string(), attributes.to_vec()));
        Ok(())
    }

    fn end_element(&mut self, name: &str) -> Result<()> {
        self.flush()?;
        self.sink.event(&XmlEvent::EndElement(name.to_string()))
    }

    fn text(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.flush()?;
        self.sink.event(&XmlEvent::Text(text.to_string()))
    }

    fn add_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        match self.pending.as_mut() {
            Some((_, attributes)) => {
                match attributes.iter_mut().find(|(n, _)| n == name) {
                    Some(slot) => slot.1 = value.to_string(),
                    None => attributes.push((name.to_string(), value.to_string())),
                }
                Ok(())
            }
            None => Err(PipeError::Configuration(
                "sql:attribute must come before any content of its element".into(),
            )),
        }
    }
}

enum StatementKind {
    Query,
    Update,
}

#[derive(Clone, Copy)]
enum ParamType {
    Text,
    Int,
    Float,
    Boolean,
}

impl ParamType {
    fn parse(attr: Option<&str>) -> Result<Self> {
        match attr {
            None | Some("string") => Ok(Self::Text),
            Some("int") => Ok(Self::Int),
            Some("float") => Ok(Self::Float),
            Some("boolean") => Ok(Self::Boolean),
            Some(other) => Err(PipeError::Configuration(format!(
                "Unsupported parameter type '{}'",
                other
            ))),
        }
    }

    fn convert(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(value);
        }
        match self {
            Self::Text => Ok(value),
            Self::Int => match &value {
                Value::Integer(_) => Ok(value),
                Value::Text(text) => text.parse::<i64>().map(Value::Integer).map_err(|_| {
                    PipeError::TypeMismatch(format!("Cannot bind '{}' as an integer", text))
                }),
                other => Err(PipeError::TypeMismatch(format!(
                    "Cannot bind {} as an integer",
                    other.type_name()
                ))),
            },
            Self::Float => match &value {
                Value::Float(_) | Value::Integer(_) => Ok(value),
                Value::Text(text) => text.parse::<f64>().map(Value::Float).map_err(|_| {
                    PipeError::TypeMismatch(format!("Cannot bind '{}' as a float", text))
                }),
                other => Err(PipeError::TypeMismatch(format!(
                    "Cannot bind {} as a float",
                    other.type_name()
                ))),
            },
            Self::Boolean => match &value {
                Value::Boolean(_) => Ok(value),
                Value::Text(text) => match text.as_str() {
                    "true" => Ok(Value::Boolean(true)),
                    "false" => Ok(Value::Boolean(false)),
                    _ => Err(PipeError::TypeMismatch(format!(
                        "Cannot bind '{}' as a boolean",
                        text
                    ))),
                },
                other => Err(PipeError::TypeMismatch(format!(
                    "Cannot bind {} as a boolean",
                    other.type_name()
                ))),
            },
        }
    }
}

pub fn interpret_document(
    session: &mut InterpreterContext<'_>,
    config: &Tree,
    out: &mut DeferredSink<'_>,
) -> Result<()> {
    let root = config.root();
    if root.name() != "sql:config" {
        return Err(PipeError::Configuration(format!(
            "Statement document root must be 'sql:config', found '{}'",
            root.name()
        )));
    }
    for content in root.children() {
        match content {
            Content::Text(text) if text.trim().is_empty() => {}
            Content::Text(text) => out.text(text)?,
            Content::Element(child) => interpret_element(session, child, out)?,
        }
    }
    out.flush()
}

fn interpret_children(
    session: &mut InterpreterContext<'_>,
    element: &Element,
    out: &mut DeferredSink<'_>,
) -> Result<()> {
    for content in element.children() {
        match content {
            Content::Text(text) => out.text(text)?,
            Content::Element(child) => interpret_element(session, child, out)?,
        }
    }
    Ok(())
}

fn interpret_element(
    session: &mut InterpreterContext<'_>,
    element: &Element,
    out: &mut DeferredSink<'_>,
) -> Result<()> {
    if !element.name().starts_with(SQL_PREFIX) {
        // Literal template content is copied through, body interpreted.
        out.start_element(element.name(), element.attributes())?;
        interpret_children(session, element, out)?;
        return out.end_element(element.name());
    }

    match element.name() {
        "sql:connection" => {
            let datasource = element.attribute("datasource").ok_or_else(|| {
                PipeError::Configuration(
                    "sql:connection is missing its datasource attribute".into(),
                )
            })?;
            let previous = session.swap_datasource(Some(datasource.to_string()));
            let result = interpret_children(session, element, out);
            session.swap_datasource(previous);
            result
        }
        "sql:execute" => interpret_execute(session, element, out),
        "sql:row-results" => interpret_row_results(session, element, out),
        "sql:get-column" => {
            let column = element.attribute("name").ok_or_else(|| {
                PipeError::Configuration("sql:get-column is missing its name attribute".into())
            })?;
            let level = parse_level(element)?;
            let (_, delegate) = session.connection()?;
            let text = delegate.column_text(session.frame(level)?.cursor()?, column)?;
            out.text(&text)
        }
        "sql:value-of" => {
            let expr = parse_select(element)?;
            let value = session.evaluate(&expr)?;
            out.text(&value.serialize()?)
        }
        "sql:attribute" => {
            let name = element.attribute("name").ok_or_else(|| {
                PipeError::Configuration("sql:attribute is missing its name attribute".into())
            })?;
            let expr = parse_select(element)?;
            let value = session.evaluate(&expr)?;
            out.add_attribute(name, &value.serialize()?)
        }
        "sql:function" => {
            let name = element.attribute("name").ok_or_else(|| {
                PipeError::Configuration("sql:function is missing its name attribute".into())
            })?;
            let body = parse_select(element)?;
            session.declare_function(name, body)
        }
        "sql:for-each" => {
            let expr = parse_select(element)?;
            let input = std::sync::Arc::clone(session.input());
            let nodes = path::select_nodes(&input, &session.current_node(), &expr)?;
            for node in nodes {
                session.push_current_node(node);
                let result = interpret_children(session, element, out);
                session.pop_current_node();
                result?;
            }
            Ok(())
        }
        "sql:query" | "sql:update" => Err(PipeError::Configuration(format!(
            "{} is only allowed inside sql:execute",
            element.name()
        ))),
        "sql:param" => Err(PipeError::Configuration(
            "sql:param is only allowed inside sql:query or sql:update".into(),
        )),
        "sql:results" | "sql:no-results" => Err(PipeError::Configuration(format!(
            "{} is only allowed inside sql:execute",
            element.name()
        ))),
        other => Err(PipeError::Configuration(format!(
            "Unknown statement element '{}'",
            other
        ))),
    }
}

/// One `sql:execute`: push a frame, run the statement, emit the matching
/// result branch, and pop the frame on every exit path.
fn interpret_execute(
    session: &mut InterpreterContext<'_>,
    element: &Element,
    out: &mut DeferredSink<'_>,
) -> Result<()> {
    session.push_frame();
    let result = interpret_execute_body(session, element, out);
    session.pop_frame();
    result
}

fn interpret_execute_body(
    session: &mut InterpreterContext<'_>,
    element: &Element,
    out: &mut DeferredSink<'_>,
) -> Result<()> {
    let mut executed = false;
    for content in element.children() {
        let child = match content {
            // Layout whitespace between the clauses of an execute block.
            Content::Text(_) => continue,
            Content::Element(child) => child,
        };
        match child.name() {
            "sql:query" | "sql:update" => {
                if executed {
                    return Err(PipeError::Configuration(
                        "sql:execute contains more than one statement".into(),
                    ));
                }
                let kind = if child.name() == "sql:query" {
                    StatementKind::Query
                } else {
                    StatementKind::Update
                };
                run_statement(session, child, kind)?;
                executed = true;
            }
            "sql:results" => {
                require_executed(executed, child.name())?;
                if session.frame(0)?.state() == FrameState::HasRows {
                    interpret_children(session, child, out)?;
                }
            }
            "sql:no-results" => {
                require_executed(executed, child.name())?;
                if session.frame(0)?.is_empty() {
                    interpret_children(session, child, out)?;
                }
            }
            _ => interpret_element(session, child, out)?,
        }
    }
    if executed {
        Ok(())
    } else {
        Err(PipeError::Configuration(
            "sql:execute contains no query or update".into(),
        ))
    }
}

/// Iterate the row-body template once per row of the innermost frame.
fn interpret_row_results(
    session: &mut InterpreterContext<'_>,
    element: &Element,
    out: &mut DeferredSink<'_>,
) -> Result<()> {
    if session.frame(0)?.state() != FrameState::HasRows {
        return Err(PipeError::Configuration(
            "sql:row-results is only allowed inside sql:results of a row-producing query".into(),
        ));
    }
    loop {
        interpret_children(session, element, out)?;
        if !session.frame_mut(0)?.advance()? {
            break;
        }
    }
    Ok(())
}

/// Resolve text and parameters, prepare on the datasource connection, bind
/// through the delegate, and execute, driving the frame state machine.
fn run_statement(
    session: &mut InterpreterContext<'_>,
    element: &Element,
    kind: StatementKind,
) -> Result<()> {
    let mut text = String::new();
    let mut params: Vec<(PathExpr, ParamType)> = Vec::new();
    for content in element.children() {
        match content {
            Content::Text(part) => text.push_str(part),
            Content::Element(child) if child.name() == "sql:param" => {
                let expr = parse_select(child)?;
                let param_type = ParamType::parse(child.attribute("type"))?;
                // The param element stands where its placeholder goes.
                text.push('?');
                params.push((expr, param_type));
            }
            Content::Element(other) => {
                return Err(PipeError::Configuration(format!(
                    "Unexpected element '{}' inside {}",
                    other.name(),
                    element.name()
                )))
            }
        }
    }
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(PipeError::Configuration(format!(
            "{} has no statement text",
            element.name()
        )));
    }

    let mut values = Vec::with_capacity(params.len());
    for (expr, param_type) in &params {
        values.push(param_type.convert(session.evaluate(expr)?)?);
    }

    let (connection, delegate) = session.connection()?;
    let statement = connection.lock()?.prepare(&text)?;

    let frame = session.frame_mut(0)?;
    frame.mark_prepared(text, statement)?;
    {
        let statement = frame.statement_mut()?;
        for (index, value) in values.into_iter().enumerate() {
            delegate.bind(statement, index + 1, value)?;
        }
    }

    let statement = frame.mark_executing()?;
    match kind {
        StatementKind::Query => {
            let mut cursor = statement.query()?;
            // Empty or not is decided by attempting the first advance.
            let has_first = cursor.advance()?;
            session.frame_mut(0)?.mark_rows(cursor, has_first)
        }
        StatementKind::Update => {
            let count = statement.execute()?;
            session.frame_mut(0)?.mark_update_done(count)
        }
    }
}

fn require_executed(executed: bool, name: &str) -> Result<()> {
    if executed {
        Ok(())
    } else {
        Err(PipeError::Configuration(format!(
            "{} must come after the statement it reports on",
            name
        )))
    }
}

fn parse_select(element: &Element) -> Result<PathExpr> {
    let select = element.attribute("select").ok_or_else(|| {
        PipeError::Configuration(format!(
            "{} is missing its select expression",
            element.name()
        ))
    })?;
    PathExpr::parse(select)
}

fn parse_level(element: &Element) -> Result<usize> {
    match element.attribute("level") {
        None => Ok(0),
        Some(level) => level.parse::<usize>().map_err(|_| {
            PipeError::Configuration(format!("Invalid frame level '{}'", level))
        }),
    }
}

/// The statement-interpreter node.
///
/// Inputs: `config` (the statement document) and `data` (the context
/// document path expressions evaluate against). Output: the interpreted
/// template. The output validity is unknown (database state cannot be
/// summarized), so reads always recompute.
pub struct SqlInterpreter {
    base: ProcessorBase,
}

impl SqlInterpreter {
    pub fn new() -> Self {
        Self {
            base: ProcessorBase::new("sql-interpreter")
                .with_input(PortInfo::new(PORT_CONFIG))
                .with_input(PortInfo::new(PORT_DATA))
                .with_output(PortInfo::new(PORT_DATA)),
        }
    }
}

impl Default for SqlInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for SqlInterpreter {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn read_impl(
        &self,
        output: &str,
        context: &ExecutionContext,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.base.check_output(output)?;
        let config = self.base.read_input_as_tree(PORT_CONFIG, context)?;
        let input = self.base.read_input_as_tree(PORT_DATA, context)?;
        let runtime = SqlRuntime::from_context(context)?;
        let mut session = InterpreterContext::new(context, runtime, input);
        let mut out = DeferredSink::new(sink);
        interpret_document(&mut session, &config, &mut out)
    }

    fn validity(&self, output: &str, _context: &ExecutionContext) -> Result<Validity> {
        self.base.check_output(output)?;
        Ok(Validity::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::db::{DatasourceRegistry, MemoryDatasource};
    use crate::xml::TreeBuilder;

    fn fixture(datasource: MemoryDatasource) -> (ExecutionContext, Arc<Tree>) {
        let registry = Arc::new(DatasourceRegistry::new());
        registry.register("orders", Arc::new(datasource)).unwrap();
        let context = ExecutionContext::new();
        registry.install(&context).unwrap();
        let input = Arc::new(Tree::new(
            Element::new("request").child(Element::new("id").text("42")),
        ));
        (context, input)
    }

    fn statement(name: &str, text: &str) -> Element {
        Element::new(name).text(text)
    }

    #[test]
    fn update_transitions_to_update_done_without_rows() {
        let datasource = MemoryDatasource::new("memdb");
        datasource.script_update("delete from orders", 3).unwrap();
        let (context, input) = fixture(datasource);
        let runtime = SqlRuntime::from_context(&context).unwrap();
        let mut session = InterpreterContext::new(&context, runtime, input);
        session.swap_datasource(Some("orders".into()));

        session.push_frame();
        run_statement(
            &mut session,
            &statement("sql:update", "delete from orders"),
            StatementKind::Update,
        )
        .unwrap();

        let frame = session.frame(0).unwrap();
        assert_eq!(frame.state(), FrameState::UpdateDone);
        assert_eq!(frame.update_count(), 3);
        assert!(frame.cursor().is_err());
        session.pop_frame();
    }

    #[test]
    fn query_with_no_rows_transitions_to_empty() {
        let datasource = MemoryDatasource::new("memdb");
        datasource
            .script_query("select id from orders", &["id"], Vec::new())
            .unwrap();
        let (context, input) = fixture(datasource);
        let runtime = SqlRuntime::from_context(&context).unwrap();
        let mut session = InterpreterContext::new(&context, runtime, input);
        session.swap_datasource(Some("orders".into()));

        session.push_frame();
        run_statement(
            &mut session,
            &statement("sql:query", "select id from orders"),
            StatementKind::Query,
        )
        .unwrap();

        let frame = session.frame(0).unwrap();
        assert_eq!(frame.state(), FrameState::Empty);
        assert!(frame.is_empty());
        assert_eq!(frame.row_position(), 0);
        session.pop_frame();
    }

    #[test]
    fn failed_statement_unwinds_the_frame_stack() {
        // Nothing scripted, so prepare fails inside the execute block.
        let (context, input) = fixture(MemoryDatasource::new("memdb"));
        let runtime = SqlRuntime::from_context(&context).unwrap();
        let mut session = InterpreterContext::new(&context, runtime, input);
        session.swap_datasource(Some("orders".into()));

        let execute = Element::new("sql:execute")
            .child(statement("sql:query", "select nothing"));
        let mut builder = TreeBuilder::new();
        let mut out = DeferredSink::new(&mut builder);
        let result = interpret_element(&mut session, &execute, &mut out);

        assert!(result.is_err());
        assert_eq!(session.frame_depth(), 0);
    }
}
