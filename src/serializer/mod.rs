//! Serializers: sink-less nodes driven for their side effect on the context.

use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::core::{PipeError, Result};
use crate::graph::{PortInfo, Processor, ProcessorBase, PORT_DATA};
use crate::xml::{EventSink, Tree};

/// Buffers its data input as a tree into the execution context, keyed by the
/// node's identity, so the owning caller can fetch it after the run.
pub struct TreeSerializer {
    base: ProcessorBase,
}

impl TreeSerializer {
    pub fn new() -> Self {
        Self {
            base: ProcessorBase::new("tree-serializer").with_input(PortInfo::new(PORT_DATA)),
        }
    }

    /// The tree captured by [`start`](Processor::start) in this context.
    pub fn tree(&self, context: &ExecutionContext) -> Result<Arc<Tree>> {
        match context.attribute::<Arc<Tree>>(self.id())? {
            Some(stored) => Ok(Arc::clone(&*stored)),
            None => Err(PipeError::Configuration(format!(
                "Tree serializer '{}' was not started in this context",
                self.id()
            ))),
        }
    }

}

impl Default for TreeSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for TreeSerializer {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn read_impl(
        &self,
        output: &str,
        _context: &ExecutionContext,
        _sink: &mut dyn EventSink,
    ) -> Result<()> {
        // No outputs are declared, so read() fails before reaching this.
        Err(PipeError::NoSuchPort(
            self.name().to_string(),
            output.to_string(),
        ))
    }

    fn start(&self, context: &ExecutionContext) -> Result<()> {
        let tree = self.base.read_input_as_tree(PORT_DATA, context)?;
        context.set_attribute(self.id(), tree)
    }
}
