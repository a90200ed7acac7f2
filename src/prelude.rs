//! Convenience imports for building and running pipelines.

pub use crate::context::{ContextKey, ContextListener, ExecutionContext};
pub use crate::core::{PipeError, Result, Value};
pub use crate::db::{Datasource, DatasourceConfig, DatasourceRegistry, MemoryDatasource};
pub use crate::generator::{LiteralGenerator, ResourceGenerator};
pub use crate::graph::{
    connect, OutputRef, PortInfo, Processor, ProcessorBase, Validity, PORT_CONFIG, PORT_DATA,
};
pub use crate::pipeline::Pipeline;
pub use crate::registry::{DerivedFactory, DirectFactory, ProcessorRegistry};
pub use crate::serializer::TreeSerializer;
pub use crate::sql::SqlInterpreter;
pub use crate::transform::{ErrorNode, IdentityTransformer};
pub use crate::xml::{Element, EventSink, Tree, TreeBuilder, XmlEvent};
