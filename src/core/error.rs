use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No processor factory bound to name '{0}'")]
    NoSuchProcessor(String),

    #[error("Node '{0}' has no port named '{1}'")]
    NoSuchPort(String, String),

    #[error("Input '{1}' of node '{0}' is not connected")]
    InputNotConnected(String, String),

    #[error("Input '{1}' of node '{0}' is already connected")]
    InputAlreadyConnected(String, String),

    #[error("Datasource '{0}' is not registered")]
    NoSuchDatasource(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Statement error: {0}")]
    Statement(String),

    #[error("Path expression error: {0}")]
    PathExpression(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Node '{0}' failed to decode its input: {1}")]
    Decode(String, String),

    #[error("Execution context is already destroyed")]
    ContextDestroyed,

    #[error("Teardown failed for {} listener(s): {}", .0.len(), .0.join("; "))]
    Teardown(Vec<String>),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, PipeError>;

impl<T> From<std::sync::PoisonError<T>> for PipeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for PipeError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
