//! Interpreter-session state: the per-context SQL runtime (connections and
//! delegates) and the three parallel stacks one statement evaluation owns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;

use crate::context::ExecutionContext;
use crate::core::{PipeError, Result, Value};
use crate::db::{DatasourceRegistry, PreparedStatement, RowCursor, SqlConnection};
use crate::path::{self, FunctionResolver, PathExpr};
use crate::sql::delegate::{delegate_for_product, DatabaseDelegate};
use crate::xml::{NodePath, Tree};

/// Context attribute key under which the SQL runtime lives.
const SQL_RUNTIME_KEY: &str = "sql-runtime";

pub type SharedConnection = Arc<Mutex<Box<dyn SqlConnection>>>;

/// Connections and delegates shared by every interpreter node evaluated in
/// one execution context, keyed by datasource name.
///
/// One connection is opened per datasource name per context, lazily on first
/// use, and registered with a teardown listener that commits on overall
/// success and rolls back otherwise.
pub struct SqlRuntime {
    connections: Mutex<HashMap<String, SharedConnection>>,
    delegates: Mutex<HashMap<String, Arc<dyn DatabaseDelegate>>>,
}

impl SqlRuntime {
    fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            delegates: Mutex::new(HashMap::new()),
        }
    }

    /// The runtime stored in the context, created on first use.
    pub fn from_context(context: &ExecutionContext) -> Result<Arc<SqlRuntime>> {
        context.attribute_or_insert(SQL_RUNTIME_KEY, SqlRuntime::new)
    }

    /// Acquire-or-create the connection for a datasource name.
    ///
    /// The map lock is held across creation, so concurrent first use from
    /// parallel branches sharing this context opens exactly one connection.
    pub fn connection(
        &self,
        context: &ExecutionContext,
        datasource: &str,
    ) -> Result<SharedConnection> {
        let mut connections = self.connections.lock()?;
        if let Some(existing) = connections.get(datasource) {
            return Ok(Arc::clone(existing));
        }

        let registry = DatasourceRegistry::from_context(context)?;
        let connection = registry.lookup(datasource)?.connect()?;
        let shared: SharedConnection = Arc::new(Mutex::new(connection));

        let teardown_connection = Arc::clone(&shared);
        let teardown_name = datasource.to_string();
        context.add_listener_fn(move |success| {
            let mut connection = teardown_connection.lock()?;
            if success {
                info!("Committing connection for datasource: {}", teardown_name);
                connection.commit()
            } else {
                info!("Rolling back connection for datasource: {}", teardown_name);
                connection.rollback()
            }
        })?;

        connections.insert(datasource.to_string(), Arc::clone(&shared));
        Ok(shared)
    }

    /// The delegate for a datasource, selected once per connection by
    /// product name and cached for the remainder of the context.
    pub fn delegate(
        &self,
        datasource: &str,
        connection: &SharedConnection,
    ) -> Result<Arc<dyn DatabaseDelegate>> {
        let mut delegates = self.delegates.lock()?;
        if let Some(existing) = delegates.get(datasource) {
            return Ok(Arc::clone(existing));
        }
        let product = connection.lock()?.product_name().to_string();
        let delegate = delegate_for_product(&product);
        delegates.insert(datasource.to_string(), Arc::clone(&delegate));
        Ok(delegate)
    }
}

/// States of one execution frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Prepared,
    Executing,
    HasRows,
    Empty,
    UpdateDone,
    Closed,
}

/// One active nested statement evaluation.
pub struct Frame {
    state: FrameState,
    statement_text: String,
    statement: Option<Box<dyn PreparedStatement>>,
    cursor: Option<Box<dyn RowCursor>>,
    row_position: usize,
    update_count: u64,
}

impl Frame {
    fn new() -> Self {
        Self {
            state: FrameState::Idle,
            statement_text: String::new(),
            statement: None,
            cursor: None,
            row_position: 0,
            update_count: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn statement_text(&self) -> &str {
        &self.statement_text
    }

    /// 1-based position of the current row; 0 before any row was fetched.
    pub fn row_position(&self) -> usize {
        self.row_position
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn is_empty(&self) -> bool {
        self.state == FrameState::Empty
    }

    fn expect_state(&self, expected: FrameState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PipeError::Statement(format!(
                "Statement frame is {:?}, expected {:?}",
                self.state, expected
            )))
        }
    }

    pub fn mark_prepared(
        &mut self,
        text: String,
        statement: Box<dyn PreparedStatement>,
    ) -> Result<()> {
        self.expect_state(FrameState::Idle)?;
        self.statement_text = text;
        self.statement = Some(statement);
        self.state = FrameState::Prepared;
        Ok(())
    }

    pub fn mark_executing(&mut self) -> Result<&mut dyn PreparedStatement> {
        self.expect_state(FrameState::Prepared)?;
        self.state = FrameState::Executing;
        Ok(self
            .statement
            .as_deref_mut()
            .expect("prepared frame holds a statement"))
    }

    pub fn statement_mut(&mut self) -> Result<&mut dyn PreparedStatement> {
        self.expect_state(FrameState::Prepared)?;
        Ok(self
            .statement
            .as_deref_mut()
            .expect("prepared frame holds a statement"))
    }

    /// Record the query outcome: the cursor was advanced once to test for
    /// emptiness, so a non-empty frame is already positioned on row 1.
    pub fn mark_rows(&mut self, cursor: Box<dyn RowCursor>, has_first: bool) -> Result<()> {
        self.expect_state(FrameState::Executing)?;
        self.cursor = Some(cursor);
        if has_first {
            self.row_position = 1;
            self.state = FrameState::HasRows;
        } else {
            self.state = FrameState::Empty;
        }
        Ok(())
    }

    pub fn mark_update_done(&mut self, count: u64) -> Result<()> {
        self.expect_state(FrameState::Executing)?;
        self.update_count = count;
        self.state = FrameState::UpdateDone;
        Ok(())
    }

    pub fn cursor(&self) -> Result<&dyn RowCursor> {
        match (&self.state, &self.cursor) {
            (FrameState::HasRows, Some(cursor)) => Ok(cursor.as_ref()),
            _ => Err(PipeError::Statement(
                "No current row in this statement frame".into(),
            )),
        }
    }

    /// Advance to the next row; `false` ends iteration without an error.
    pub fn advance(&mut self) -> Result<bool> {
        self.expect_state(FrameState::HasRows)?;
        let cursor = self
            .cursor
            .as_mut()
            .expect("frame with rows holds a cursor");
        if cursor.advance()? {
            self.row_position += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release statement and cursor. Runs on every exit path.
    fn close(&mut self) {
        self.cursor = None;
        self.statement = None;
        self.state = FrameState::Closed;
    }
}

/// Everything one interpreter evaluation owns: the SQL runtime handle, the
/// input document, and the three parallel stacks (execution frames, current
/// path-context nodes, function tables).
///
/// The stacks are explicit so that cleanup on error can unwind all three
/// together, independent of call-stack depth.
pub struct InterpreterContext<'a> {
    context: &'a ExecutionContext,
    runtime: Arc<SqlRuntime>,
    input: Arc<Tree>,
    datasource: Option<String>,
    frames: Vec<Frame>,
    current_nodes: Vec<NodePath>,
    functions: Vec<HashMap<String, PathExpr>>,
}

impl<'a> InterpreterContext<'a> {
    pub fn new(context: &'a ExecutionContext, runtime: Arc<SqlRuntime>, input: Arc<Tree>) -> Self {
        Self {
            context,
            runtime,
            input,
            datasource: None,
            frames: Vec::new(),
            // The input root is the default context for path expressions.
            current_nodes: vec![NodePath::root()],
            functions: Vec::new(),
        }
    }

    pub fn execution_context(&self) -> &ExecutionContext {
        self.context
    }

    pub fn input(&self) -> &Arc<Tree> {
        &self.input
    }

    /// Replace the datasource in scope, returning the previous one so a
    /// connection element can restore it when its body ends.
    pub fn swap_datasource(&mut self, datasource: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.datasource, datasource)
    }

    pub fn datasource(&self) -> Result<&str> {
        self.datasource.as_deref().ok_or_else(|| {
            PipeError::Configuration(
                "No datasource in scope; statements must appear inside a connection element"
                    .into(),
            )
        })
    }

    /// The connection for the datasource in scope, with its delegate.
    pub fn connection(&self) -> Result<(SharedConnection, Arc<dyn DatabaseDelegate>)> {
        let datasource = self.datasource()?;
        let connection = self.runtime.connection(self.context, datasource)?;
        let delegate = self.runtime.delegate(datasource, &connection)?;
        Ok((connection, delegate))
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Frame::new());
        self.functions.push(HashMap::new());
    }

    /// Pop and close the innermost frame together with its function table.
    pub fn pop_frame(&mut self) {
        if let Some(mut frame) = self.frames.pop() {
            frame.close();
        }
        self.functions.pop();
    }

    /// Frame at `level`: 0 is the innermost, 1 its enclosing frame, and so
    /// on. This is how nested statements reference an enclosing row.
    pub fn frame(&self, level: usize) -> Result<&Frame> {
        let depth = self.frames.len();
        if level >= depth {
            return Err(PipeError::Statement(format!(
                "No statement frame at level {} (depth {})",
                level, depth
            )));
        }
        Ok(&self.frames[depth - 1 - level])
    }

    pub fn frame_mut(&mut self, level: usize) -> Result<&mut Frame> {
        let depth = self.frames.len();
        if level >= depth {
            return Err(PipeError::Statement(format!(
                "No statement frame at level {} (depth {})",
                level, depth
            )));
        }
        Ok(&mut self.frames[depth - 1 - level])
    }

    pub fn push_current_node(&mut self, node: NodePath) {
        self.current_nodes.push(node);
    }

    pub fn pop_current_node(&mut self) {
        self.current_nodes.pop();
    }

    pub fn current_node(&self) -> NodePath {
        self.current_nodes
            .last()
            .cloned()
            .unwrap_or_else(NodePath::root)
    }

    /// Declare a statement-local function in the innermost table, shadowing
    /// any outer definition of the same name.
    pub fn declare_function(&mut self, name: impl Into<String>, body: PathExpr) -> Result<()> {
        match self.functions.last_mut() {
            Some(table) => {
                table.insert(name.into(), body);
                Ok(())
            }
            None => Err(PipeError::Configuration(
                "Function declarations are only allowed inside a statement".into(),
            )),
        }
    }

    /// Evaluate a path expression against the current node, with this
    /// session's function stack in scope.
    pub fn evaluate(&mut self, expr: &PathExpr) -> Result<Value> {
        let tree = Arc::clone(&self.input);
        let current = self.current_node();
        path::evaluate(&tree, &current, expr, self)
    }

    fn lookup_function(&self, name: &str) -> Option<PathExpr> {
        for table in self.functions.iter().rev() {
            if let Some(body) = table.get(name) {
                return Some(body.clone());
            }
        }
        None
    }
}

impl FunctionResolver for InterpreterContext<'_> {
    /// Statement-local functions shadow outer ones; lookup walks the stack
    /// innermost to outermost, then falls back to the built-ins.
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        if let Some(body) = self.lookup_function(name) {
            return self.evaluate(&body);
        }

        match name {
            "row-position" => {
                let level = optional_level(args, 0)?;
                Ok(Value::Integer(self.frame(level)?.row_position() as i64))
            }
            "get-column" => {
                let column = args
                    .first()
                    .and_then(|value| value.as_str())
                    .ok_or_else(|| {
                        PipeError::PathExpression(
                            "get-column expects a column name argument".into(),
                        )
                    })?
                    .to_string();
                let level = optional_level(args, 1)?;
                self.frame(level)?.cursor()?.value(&column)
            }
            other => Err(PipeError::PathExpression(format!(
                "Undeclared function: {}",
                other
            ))),
        }
    }
}

fn optional_level(args: &[Value], position: usize) -> Result<usize> {
    match args.get(position) {
        None => Ok(0),
        Some(value) => value
            .as_i64()
            .filter(|level| *level >= 0)
            .map(|level| level as usize)
            .ok_or_else(|| {
                PipeError::PathExpression(format!(
                    "Frame level must be a non-negative integer, got {}",
                    value
                ))
            }),
    }
}
