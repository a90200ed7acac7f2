//! Minimal path-expression capability consumed by the statement interpreter.
//!
//! Supports the subset the statement documents need: absolute and relative
//! child steps, a final attribute step, `.`, and top-level function calls
//! with literal arguments. Deliberately not a general XPath implementation.

use crate::core::{PipeError, Result, Value};
use crate::xml::{Element, NodePath, Tree};

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Current,
    Child(String),
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathExpr {
    Steps { absolute: bool, steps: Vec<Step> },
    Call { name: String, args: Vec<Value> },
}

/// Dispatch point for named functions inside path expressions.
///
/// The interpreter implements this over its function-table stack; plain
/// engine callers use [`NoFunctions`].
pub trait FunctionResolver {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value>;
}

/// Resolver for contexts where no functions are in scope.
pub struct NoFunctions;

impl FunctionResolver for NoFunctions {
    fn call(&mut self, name: &str, _args: &[Value]) -> Result<Value> {
        Err(PipeError::PathExpression(format!(
            "Undeclared function: {}",
            name
        )))
    }
}

impl PathExpr {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipeError::PathExpression("Empty path expression".into()));
        }

        if let Some(call) = Self::parse_call(text)? {
            return Ok(call);
        }

        let (absolute, rest) = match text.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        if rest.is_empty() {
            return Err(PipeError::PathExpression(
                "Path expression selects nothing".into(),
            ));
        }

        let mut steps = Vec::new();
        let segments: Vec<&str> = rest.split('/').collect();
        for (position, segment) in segments.iter().enumerate() {
            let step = match *segment {
                "" => {
                    return Err(PipeError::PathExpression(format!(
                        "Empty step in path expression '{}'",
                        text
                    )))
                }
                "." => Step::Current,
                name if name.starts_with('@') => {
                    if position + 1 != segments.len() {
                        return Err(PipeError::PathExpression(format!(
                            "Attribute step must be last in '{}'",
                            text
                        )));
                    }
                    Step::Attribute(name[1..].to_string())
                }
                name => {
                    Self::check_name(name, text)?;
                    Step::Child(name.to_string())
                }
            };
            steps.push(step);
        }
        Ok(Self::Steps { absolute, steps })
    }

    fn parse_call(text: &str) -> Result<Option<Self>> {
        let open = match text.find('(') {
            Some(open) if text.ends_with(')') && !text.contains('/') => open,
            _ => return Ok(None),
        };
        let name = &text[..open];
        Self::check_name(name, text)?;

        let body = text[open + 1..text.len() - 1].trim();
        let mut args = Vec::new();
        if !body.is_empty() {
            for raw in body.split(',') {
                args.push(Self::parse_literal(raw.trim(), text)?);
            }
        }
        Ok(Some(Self::Call {
            name: name.to_string(),
            args,
        }))
    }

    fn parse_literal(raw: &str, expr: &str) -> Result<Value> {
        if raw.len() >= 2
            && ((raw.starts_with('\'') && raw.ends_with('\''))
                || (raw.starts_with('"') && raw.ends_with('"')))
        {
            return Ok(Value::Text(raw[1..raw.len() - 1].to_string()));
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Ok(Value::Integer(i));
        }
        if let Ok(f) = raw.parse::<f64>() {
            return Ok(Value::Float(f));
        }
        Err(PipeError::PathExpression(format!(
            "Unsupported function argument '{}' in '{}'",
            raw, expr
        )))
    }

    fn check_name(name: &str, expr: &str) -> Result<()> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'));
        if valid {
            Ok(())
        } else {
            Err(PipeError::PathExpression(format!(
                "Invalid name '{}' in path expression '{}'",
                name, expr
            )))
        }
    }
}

/// Evaluate a path expression against the current node of a tree.
///
/// A steps-path that selects nothing evaluates to [`Value::Null`]; the string
/// value of the selected element (or attribute) otherwise.
pub fn evaluate(
    tree: &Tree,
    current: &NodePath,
    expr: &PathExpr,
    functions: &mut dyn FunctionResolver,
) -> Result<Value> {
    match expr {
        PathExpr::Call { name, args } => functions.call(name, args),
        PathExpr::Steps { absolute, steps } => {
            let start = if *absolute {
                NodePath::root()
            } else {
                current.clone()
            };
            let mut node = match tree.node(&start) {
                Some(node) => node,
                None => return Ok(Value::Null),
            };
            for (position, step) in steps.iter().enumerate() {
                match step {
                    Step::Current => {}
                    Step::Attribute(name) => {
                        // Parser guarantees the attribute step is last.
                        debug_assert_eq!(position + 1, steps.len());
                        return Ok(match node.attribute(name) {
                            Some(value) => Value::Text(value.to_string()),
                            None => Value::Null,
                        });
                    }
                    Step::Child(name) => {
                        node = match first_child(tree, node, *absolute, position, name) {
                            Some(node) => node,
                            None => return Ok(Value::Null),
                        };
                    }
                }
            }
            Ok(Value::Text(node.string_value()))
        }
    }
}

// An absolute path names the root element as its first step, XPath-style:
// /request/id starts matching "request" against the root itself.
fn first_child<'a>(
    tree: &'a Tree,
    node: &'a Element,
    absolute: bool,
    position: usize,
    name: &str,
) -> Option<&'a Element> {
    if absolute && position == 0 {
        if tree.root().name() == name {
            return Some(node);
        }
        return None;
    }
    node.child_element(name)
}

/// Select every node a steps-path matches, for iteration constructs.
pub fn select_nodes(tree: &Tree, current: &NodePath, expr: &PathExpr) -> Result<Vec<NodePath>> {
    let (absolute, steps) = match expr {
        PathExpr::Steps { absolute, steps } => (*absolute, steps),
        PathExpr::Call { name, .. } => {
            return Err(PipeError::PathExpression(format!(
                "Function call '{}' cannot be used to select nodes",
                name
            )))
        }
    };

    let start = if absolute {
        NodePath::root()
    } else {
        current.clone()
    };
    if tree.node(&start).is_none() {
        return Ok(Vec::new());
    }

    let mut frontier = vec![start];
    for (position, step) in steps.iter().enumerate() {
        match step {
            Step::Current => {}
            Step::Attribute(name) => {
                return Err(PipeError::PathExpression(format!(
                    "Attribute step '@{}' cannot be used to select nodes",
                    name
                )))
            }
            Step::Child(name) => {
                if absolute && position == 0 {
                    if tree.root().name() != name {
                        return Ok(Vec::new());
                    }
                    continue;
                }
                let mut next = Vec::new();
                for path in &frontier {
                    let node = tree.node(path).expect("frontier paths resolve");
                    for (index, child) in node.child_elements() {
                        if child.name() == name {
                            next.push(path.descend(index));
                        }
                    }
                }
                frontier = next;
            }
        }
    }
    Ok(frontier)
}
