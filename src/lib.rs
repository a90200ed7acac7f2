// ============================================================================
// pipeflow
// ============================================================================
//
// A pull-based, cache-aware dataflow execution engine together with its most
// complex client, a nested statement interpreter that evaluates parameterized
// relational statements embedded inside XML templates and streams the results
// back into the dataflow graph.
//
// A root node is asked to produce its output; it pulls from its declared
// inputs, each another node's output, lazily and recursively until leaf
// generators are reached. Results stream forward as events; an
// `ExecutionContext` threads through every call, carrying shared resources
// (database connections, caching state) that survive across node boundaries
// but not across runs.

pub mod context;
pub mod core;
pub mod db;
pub mod generator;
pub mod graph;
pub mod path;
pub mod pipeline;
pub mod registry;
pub mod serializer;
pub mod sql;
pub mod transform;
pub mod xml;

pub mod prelude;

// Re-export main types for convenience
pub use crate::context::{ContextKey, ContextListener, ExecutionContext};
pub use crate::core::{PipeError, Result, Value};
pub use crate::graph::{
    connect, NodeId, OutputCache, OutputRef, PortInfo, Processor, ProcessorBase, Validity,
    PORT_CONFIG, PORT_DATA,
};
pub use crate::pipeline::Pipeline;
pub use crate::registry::{
    DerivedFactory, DirectFactory, FnFactory, ProcessorFactory, ProcessorRegistry,
};
pub use crate::xml::{Content, Element, EventSink, Tree, TreeBuilder, XmlEvent};

// Re-export the datasource boundary and the interpreter
pub use crate::db::{
    Datasource, DatasourceConfig, DatasourceRegistry, MemoryDatasource, PreparedStatement,
    RowCursor, SqlConnection,
};
pub use crate::sql::SqlInterpreter;
