//! Facade for driving one pipeline evaluation with guaranteed teardown.

use std::sync::Arc;

use log::debug;

use crate::context::ExecutionContext;
use crate::core::Result;
use crate::graph::{OutputRef, Processor};
use crate::xml::{EventSink, Tree, TreeBuilder};

/// A root output plus the run protocol around it.
///
/// The graph itself is constructed once and reused; a `Pipeline` adds the
/// per-run choreography: evaluate, then destroy the context with the overall
/// success flag. Teardown listeners fire strictly after evaluation returned,
/// and before any error is surfaced to the caller.
pub struct Pipeline {
    root: OutputRef,
}

impl Pipeline {
    pub fn new(node: Arc<dyn Processor>, output: impl Into<String>) -> Self {
        Self {
            root: OutputRef::new(node, output),
        }
    }

    pub fn from_output(root: OutputRef) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &OutputRef {
        &self.root
    }

    /// Evaluate the root output into `sink`, then destroy the context.
    ///
    /// The context is destroyed exactly once on every path: with
    /// `success=true` after a clean run, with `success=false` when
    /// evaluation failed, so in-flight connections roll back before the
    /// error reaches the caller.
    pub fn run(&self, context: &ExecutionContext, sink: &mut dyn EventSink) -> Result<()> {
        let result = self.root.read(context, sink);
        debug!(
            "Pipeline evaluation finished (success: {}), destroying context",
            result.is_ok()
        );
        let teardown = context.destroy(result.is_ok());
        match result {
            // The evaluation error wins; teardown failures were already
            // logged by the context.
            Err(err) => Err(err),
            Ok(()) => teardown,
        }
    }

    /// Evaluate and buffer the root output, then destroy the context.
    pub fn run_to_tree(&self, context: &ExecutionContext) -> Result<Tree> {
        let mut builder = TreeBuilder::new();
        self.run(context, &mut builder)?;
        builder.finish()
    }
}
