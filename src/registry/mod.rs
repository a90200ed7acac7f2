//! Declarative name → node-factory registry.
//!
//! Supports direct bindings (a named built-in constructor) and derived
//! bindings: wrap an existing binding and wire extra inputs (literal
//! embedded trees or external resources) onto the base instance's input
//! ports before returning it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use log::debug;

use crate::context::ExecutionContext;
use crate::core::{PipeError, Result};
use crate::generator::{LiteralGenerator, ResourceGenerator};
use crate::graph::{connect, Processor, PORT_DATA};
use crate::serializer::TreeSerializer;
use crate::sql::SqlInterpreter;
use crate::transform::{ErrorNode, IdentityTransformer};
use crate::xml::{Content, Element, Tree};

/// Produces a new node instance.
///
/// The execution context is available so a factory can resolve further
/// configuration at instantiation time.
pub trait ProcessorFactory: Send + Sync {
    fn create_instance(
        &self,
        context: &ExecutionContext,
        registry: &ProcessorRegistry,
    ) -> Result<Arc<dyn Processor>>;
}

/// Adapter turning a closure into a factory.
pub struct FnFactory<F>(pub F);

impl<F> ProcessorFactory for FnFactory<F>
where
    F: Fn(&ExecutionContext) -> Result<Arc<dyn Processor>> + Send + Sync,
{
    fn create_instance(
        &self,
        context: &ExecutionContext,
        _registry: &ProcessorRegistry,
    ) -> Result<Arc<dyn Processor>> {
        (self.0)(context)
    }
}

type Constructor = fn() -> Arc<dyn Processor>;

lazy_static! {
    /// Built-in constructors addressable from direct registry bindings.
    static ref CONSTRUCTORS: HashMap<&'static str, Constructor> = {
        let mut table: HashMap<&'static str, Constructor> = HashMap::new();
        table.insert("identity", || Arc::new(IdentityTransformer::new()));
        table.insert("error", || Arc::new(ErrorNode::new()));
        table.insert("tree-serializer", || Arc::new(TreeSerializer::new()));
        table.insert("sql-interpreter", || Arc::new(SqlInterpreter::new()));
        table
    };
}

/// Direct binding: instantiate a built-in implementation by kind name.
pub struct DirectFactory {
    kind: String,
}

impl DirectFactory {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

impl ProcessorFactory for DirectFactory {
    fn create_instance(
        &self,
        _context: &ExecutionContext,
        _registry: &ProcessorRegistry,
    ) -> Result<Arc<dyn Processor>> {
        match CONSTRUCTORS.get(self.kind.as_str()) {
            Some(constructor) => Ok(constructor()),
            None => Err(PipeError::Configuration(format!(
                "Cannot instantiate processor: no implementation named '{}'",
                self.kind
            ))),
        }
    }
}

enum ExtraSource {
    Literal(Tree),
    Resource(PathBuf),
}

struct ExtraInput {
    port: String,
    // Built once, when the factory is constructed: generator identity (and
    // therefore its output cache) is stable across instantiations.
    generator: Arc<dyn Processor>,
}

/// Derived binding: instantiate a base binding, then wire extra inputs onto
/// its ports, in declaration order.
pub struct DerivedFactory {
    base: String,
    inputs: Vec<ExtraInput>,
}

impl DerivedFactory {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            inputs: Vec::new(),
        }
    }

    fn with_input(mut self, port: impl Into<String>, source: ExtraSource) -> Self {
        let generator: Arc<dyn Processor> = match source {
            ExtraSource::Literal(tree) => Arc::new(LiteralGenerator::new(tree)),
            ExtraSource::Resource(path) => Arc::new(ResourceGenerator::new(path)),
        };
        self.inputs.push(ExtraInput {
            port: port.into(),
            generator,
        });
        self
    }

    pub fn with_literal(self, port: impl Into<String>, tree: Tree) -> Self {
        self.with_input(port, ExtraSource::Literal(tree))
    }

    pub fn with_resource(self, port: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.with_input(port, ExtraSource::Resource(path.into()))
    }
}

impl ProcessorFactory for DerivedFactory {
    fn create_instance(
        &self,
        context: &ExecutionContext,
        registry: &ProcessorRegistry,
    ) -> Result<Arc<dyn Processor>> {
        let base_factory = registry.lookup(&self.base)?;
        let node = base_factory.create_instance(context, registry)?;
        for input in &self.inputs {
            connect(&input.generator, PORT_DATA, &node, &input.port)?;
        }
        Ok(node)
    }
}

/// Name → factory map. Binding is last-write-wins; there is no removal.
pub struct ProcessorRegistry {
    bindings: Mutex<HashMap<String, Arc<dyn ProcessorFactory>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
        }
    }

    pub fn bind(&self, name: impl Into<String>, factory: Arc<dyn ProcessorFactory>) -> Result<()> {
        let name = name.into();
        debug!("Binding processor name: {}", name);
        let mut bindings = self.bindings.lock()?;
        bindings.insert(name, factory);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn ProcessorFactory>> {
        let bindings = self.bindings.lock()?;
        bindings
            .get(name)
            .cloned()
            .ok_or_else(|| PipeError::NoSuchProcessor(name.to_string()))
    }

    /// Look up a name and instantiate it in one step.
    pub fn create(&self, name: &str, context: &ExecutionContext) -> Result<Arc<dyn Processor>> {
        self.lookup(name)?.create_instance(context, self)
    }

    /// Populate the registry from a registry-population document:
    /// `processors/processor*`, each carrying a `name` attribute and either
    /// a `kind` child or an `instantiation` child. Malformed entries are
    /// fatal at bind time.
    pub fn populate(&self, config: &Tree) -> Result<()> {
        if config.root().name() != "processors" {
            return Err(PipeError::Configuration(format!(
                "Registry document root must be 'processors', found '{}'",
                config.root().name()
            )));
        }
        for (_, entry) in config.root().child_elements() {
            if entry.name() != "processor" {
                return Err(PipeError::Configuration(format!(
                    "Unexpected element '{}' in registry document",
                    entry.name()
                )));
            }
            let name = entry
                .attribute("name")
                .filter(|name| !name.trim().is_empty())
                .ok_or_else(|| {
                    PipeError::Configuration("Missing or empty processor name".into())
                })?;

            let kind = entry.child_element("kind");
            let instantiation = entry.child_element("instantiation");
            let factory: Arc<dyn ProcessorFactory> = match (kind, instantiation) {
                (Some(kind), None) => {
                    let class = kind.attribute("name").ok_or_else(|| {
                        PipeError::Configuration(format!(
                            "Processor '{}': kind element is missing its name",
                            name
                        ))
                    })?;
                    Arc::new(DirectFactory::new(class))
                }
                (None, Some(instantiation)) => Arc::new(Self::derived_entry(name, instantiation)?),
                (Some(_), Some(_)) => {
                    return Err(PipeError::Configuration(format!(
                        "Processor '{}' declares both a kind and an instantiation",
                        name
                    )))
                }
                (None, None) => {
                    return Err(PipeError::Configuration(format!(
                        "Processor '{}' declares neither a kind nor an instantiation",
                        name
                    )))
                }
            };
            self.bind(name, factory)?;
        }
        Ok(())
    }

    fn derived_entry(name: &str, instantiation: &Element) -> Result<DerivedFactory> {
        let base = instantiation
            .attribute("name")
            .filter(|base| !base.trim().is_empty())
            .ok_or_else(|| {
                PipeError::Configuration(format!(
                    "Processor '{}': instantiation is missing its base name",
                    name
                ))
            })?;
        let mut factory = DerivedFactory::new(base);
        for (_, input) in instantiation.child_elements() {
            if input.name() != "input" {
                return Err(PipeError::Configuration(format!(
                    "Processor '{}': unexpected element '{}' in instantiation",
                    name,
                    input.name()
                )));
            }
            let port = input.attribute("name").ok_or_else(|| {
                PipeError::Configuration(format!(
                    "Processor '{}': instantiation input is missing its port name",
                    name
                ))
            })?;
            if let Some(src) = input.attribute("src") {
                factory = factory.with_resource(port, src);
            } else {
                let literal = input
                    .children()
                    .iter()
                    .find_map(|content| match content {
                        Content::Element(element) => Some(element.clone()),
                        Content::Text(_) => None,
                    })
                    .ok_or_else(|| {
                        PipeError::Configuration(format!(
                            "Processor '{}': instantiation input '{}' has neither a src nor literal content",
                            name, port
                        ))
                    })?;
                factory = factory.with_literal(port, Tree::new(literal));
            }
        }
        Ok(factory)
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
