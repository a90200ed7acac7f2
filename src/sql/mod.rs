//! The nested statement interpreter: the engine's most complex client.

pub mod context;
pub mod delegate;
pub mod interpret;

pub use context::{Frame, FrameState, InterpreterContext, SqlRuntime};
pub use delegate::{delegate_for_product, DatabaseDelegate, GenericDelegate, OracleDelegate};
pub use interpret::SqlInterpreter;
