//! Small pass-through and diagnostic transformers.

use crate::context::ExecutionContext;
use crate::core::{PipeError, Result};
use crate::graph::{OutputCache, PortInfo, Processor, ProcessorBase, PORT_CONFIG, PORT_DATA};
use crate::xml::EventSink;

/// Copies its data input to its data output unchanged.
///
/// Cacheable, which makes it the usual base node for derived registry
/// bindings: the wired inputs determine its validity.
pub struct IdentityTransformer {
    base: ProcessorBase,
    cache: OutputCache,
}

impl IdentityTransformer {
    pub fn new() -> Self {
        Self {
            base: ProcessorBase::new("identity")
                .with_input(PortInfo::new(PORT_DATA))
                .with_output(PortInfo::new(PORT_DATA)),
            cache: OutputCache::new(),
        }
    }
}

impl Default for IdentityTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for IdentityTransformer {
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
        self.base.read_input(PORT_DATA, context, sink)
    }

    fn cache(&self, _output: &str) -> Option<&OutputCache> {
        Some(&self.cache)
    }
}

/// Fails every read with the message carried by its config input.
pub struct ErrorNode {
    base: ProcessorBase,
}

impl ErrorNode {
    pub fn new() -> Self {
        Self {
            base: ProcessorBase::new("error")
                .with_input(PortInfo::new(PORT_CONFIG))
                .with_output(PortInfo::new(PORT_DATA)),
        }
    }
}

impl Default for ErrorNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for ErrorNode {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn read_impl(
        &self,
        output: &str,
        context: &ExecutionContext,
        _sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.base.check_output(output)?;
        let config = self.base.read_input_as_tree(PORT_CONFIG, context)?;
        Err(PipeError::Configuration(config.root().string_value()))
    }
}
