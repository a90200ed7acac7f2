use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::context::ExecutionContext;
use crate::core::{PipeError, Result};
use crate::graph::cache::{OutputCache, Validity};
use crate::graph::port::PortInfo;
use crate::xml::{EventSink, Tree, TreeBuilder};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

/// Stable identity of a node instance, used to key per-evaluation state in
/// the [`ExecutionContext`] and for cache attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Handle to one output port of a node; what an input port connects to.
///
/// Fan-out is permitted: the same output may feed any number of inputs.
#[derive(Clone)]
pub struct OutputRef {
    node: Arc<dyn Processor>,
    port: String,
}

impl OutputRef {
    pub fn new(node: Arc<dyn Processor>, port: impl Into<String>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }

    pub fn node(&self) -> &Arc<dyn Processor> {
        &self.node
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn read(&self, context: &ExecutionContext, sink: &mut dyn EventSink) -> Result<()> {
        self.node.read(&self.port, context, sink)
    }

    pub fn validity(&self, context: &ExecutionContext) -> Result<Validity> {
        self.node.validity(&self.port, context)
    }

    /// Read the whole output as a buffered tree, going through the producing
    /// output's cache when its validity allows.
    pub fn read_as_tree(&self, context: &ExecutionContext) -> Result<Arc<Tree>> {
        if let Some(cache) = self.node.cache(&self.port) {
            let validity = self.validity(context)?;
            if validity.is_cacheable() {
                return cache.cached_tree(&validity, || self.build_tree(context));
            }
        }
        self.build_tree(context).map(Arc::new)
    }

    /// Read the whole output as a decoded object, cache-aware per object
    /// type. Decoder failures are surfaced untouched; callers attribute them.
    pub fn read_as_object<T, D>(&self, context: &ExecutionContext, decoder: D) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        D: FnOnce(&Tree) -> Result<T>,
    {
        if let Some(cache) = self.node.cache(&self.port) {
            let validity = self.validity(context)?;
            if validity.is_cacheable() {
                return cache.cached_object(&validity, || {
                    let tree = self.build_tree(context)?;
                    decoder(&tree)
                });
            }
        }
        let tree = self.read_as_tree(context)?;
        decoder(&tree).map(Arc::new)
    }

    fn build_tree(&self, context: &ExecutionContext) -> Result<Tree> {
        let mut builder = TreeBuilder::new();
        // read_impl, not read: the cache layer calling this already decided
        // recomputation is needed.
        self.node.read_impl(&self.port, context, &mut builder)?;
        builder.finish()
    }
}

/// Port declarations and input wiring shared by every processor.
///
/// Wiring happens once at graph-construction time; evaluation only reads it.
pub struct ProcessorBase {
    id: NodeId,
    name: String,
    inputs: Vec<PortInfo>,
    outputs: Vec<PortInfo>,
    connections: RwLock<HashMap<String, OutputRef>>,
}

impl ProcessorBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NodeId::next(),
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_input(mut self, info: PortInfo) -> Self {
        self.inputs.push(info);
        self
    }

    pub fn with_output(mut self, info: PortInfo) -> Self {
        self.outputs.push(info);
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[PortInfo] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortInfo] {
        &self.outputs
    }

    pub fn has_output(&self, port: &str) -> bool {
        self.outputs.iter().any(|info| info.name() == port)
    }

    pub fn check_output(&self, port: &str) -> Result<()> {
        if self.has_output(port) {
            Ok(())
        } else {
            Err(PipeError::NoSuchPort(self.name.clone(), port.to_string()))
        }
    }

    fn check_input(&self, port: &str) -> Result<()> {
        if self.inputs.iter().any(|info| info.name() == port) {
            Ok(())
        } else {
            Err(PipeError::NoSuchPort(self.name.clone(), port.to_string()))
        }
    }

    /// Connect an upstream output to one of the declared input ports.
    ///
    /// Each input accepts exactly one connection; a second connection to the
    /// same port is a configuration error.
    pub fn connect_input(&self, port: &str, source: OutputRef) -> Result<()> {
        self.check_input(port)?;
        let mut connections = self.connections.write()?;
        if connections.contains_key(port) {
            return Err(PipeError::InputAlreadyConnected(
                self.name.clone(),
                port.to_string(),
            ));
        }
        connections.insert(port.to_string(), source);
        Ok(())
    }

    /// The upstream output connected to an input port.
    ///
    /// Reading an unconnected input is a configuration error, never retried.
    pub fn input_connection(&self, port: &str) -> Result<OutputRef> {
        self.check_input(port)?;
        let connections = self.connections.read()?;
        connections.get(port).cloned().ok_or_else(|| {
            PipeError::InputNotConnected(self.name.clone(), port.to_string())
        })
    }

    pub fn read_input(
        &self,
        port: &str,
        context: &ExecutionContext,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.input_connection(port)?.read(context, sink)
    }

    pub fn read_input_as_tree(
        &self,
        port: &str,
        context: &ExecutionContext,
    ) -> Result<Arc<Tree>> {
        self.input_connection(port)?.read_as_tree(context)
    }

    /// Read an input as a decoded object; decoder failures are attributed to
    /// this node.
    pub fn read_input_as_object<T, D>(
        &self,
        port: &str,
        context: &ExecutionContext,
        decoder: D,
    ) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        D: FnOnce(&Tree) -> Result<T>,
    {
        let name = self.name.clone();
        self.input_connection(port)?
            .read_as_object(context, decoder)
            .map_err(|err| match err {
                decode @ PipeError::Decode(..) => decode,
                other => PipeError::Decode(name, other.to_string()),
            })
    }

    pub fn input_validity(&self, port: &str, context: &ExecutionContext) -> Result<Validity> {
        self.input_connection(port)?.validity(context)
    }

    /// Combined validity of every declared input, in declaration order.
    pub fn combined_input_validity(&self, context: &ExecutionContext) -> Result<Validity> {
        if self.inputs.is_empty() {
            return Ok(Validity::Unknown);
        }
        let mut parts = Vec::with_capacity(self.inputs.len());
        for info in &self.inputs {
            parts.push(self.input_validity(info.name(), context)?);
        }
        Ok(Validity::combine(parts))
    }
}

/// A unit of computation in the dataflow graph.
///
/// Implementors provide [`read_impl`](Self::read_impl) (the raw computation)
/// and optionally [`cache`](Self::cache)/[`validity`](Self::validity); the
/// provided [`read`](Self::read) wraps the computation with the caching
/// contract and is what consumers call. Processors hold no per-evaluation
/// state of their own, so one instance is safe under concurrent reads with
/// distinct contexts.
pub trait Processor: Send + Sync {
    fn base(&self) -> &ProcessorBase;

    /// Compute one output as an event sequence. Engine-internal entry point;
    /// consumers go through [`read`](Self::read).
    fn read_impl(
        &self,
        output: &str,
        context: &ExecutionContext,
        sink: &mut dyn EventSink,
    ) -> Result<()>;

    fn id(&self) -> NodeId {
        self.base().id()
    }

    fn name(&self) -> &str {
        self.base().name()
    }

    /// Current validity of an output. Defaults to the combined validity of
    /// all declared inputs; leaf generators override this.
    fn validity(&self, output: &str, context: &ExecutionContext) -> Result<Validity> {
        self.base().check_output(output)?;
        self.base().combined_input_validity(context)
    }

    /// The memoization slot for an output, when the output is cacheable.
    fn cache(&self, _output: &str) -> Option<&OutputCache> {
        None
    }

    /// Primary contract: deliver the output into `sink`, replaying a cached
    /// artifact when the validity token matches, recomputing otherwise.
    fn read(
        &self,
        output: &str,
        context: &ExecutionContext,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.base().check_output(output)?;
        if let Some(cache) = self.cache(output) {
            let validity = self.validity(output, context)?;
            if validity.is_cacheable() {
                let tree = cache.cached_tree(&validity, || {
                    let mut builder = TreeBuilder::new();
                    self.read_impl(output, context, &mut builder)?;
                    builder.finish()
                })?;
                return tree.replay(sink);
            }
        }
        self.read_impl(output, context, sink)
    }

    /// Entry point for sink-less processors (serializers) that are driven
    /// for their side effect on the context rather than for an output.
    fn start(&self, _context: &ExecutionContext) -> Result<()> {
        Err(PipeError::Configuration(format!(
            "Processor '{}' has no start operation",
            self.name()
        )))
    }
}
