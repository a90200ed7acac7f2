//! The dataflow graph: processors with named ports, wiring, and the
//! validity-token caching contract.

pub mod cache;
pub mod node;
pub mod port;

pub use cache::{OutputCache, Validity};
pub use node::{NodeId, OutputRef, Processor, ProcessorBase};
pub use port::{PortInfo, PORT_CONFIG, PORT_DATA};

use std::sync::Arc;

use crate::core::Result;

/// Connect a source node's output to a target node's input port.
///
/// The connection graph must stay acyclic; wiring happens once at
/// construction time and is reused across evaluations.
pub fn connect(
    source: &Arc<dyn Processor>,
    source_port: &str,
    target: &Arc<dyn Processor>,
    target_port: &str,
) -> Result<()> {
    source.base().check_output(source_port)?;
    target
        .base()
        .connect_input(target_port, OutputRef::new(Arc::clone(source), source_port))
}
