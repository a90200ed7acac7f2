//! Leaf generators: the nodes a pull reaches last.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::debug;

use crate::context::ExecutionContext;
use crate::core::{PipeError, Result};
use crate::graph::{OutputCache, PortInfo, Processor, ProcessorBase, Validity, PORT_DATA};
use crate::xml::{EventSink, Tree};

/// Replays an embedded tree. Used for literal data wired by derived registry
/// factories and for feeding fixed documents into a graph.
pub struct LiteralGenerator {
    base: ProcessorBase,
    tree: Tree,
    validity: Validity,
    cache: OutputCache,
}

impl LiteralGenerator {
    /// Validity defaults to the content digest of the embedded tree.
    pub fn new(tree: Tree) -> Self {
        let validity = Validity::Digest(tree.digest());
        Self::with_validity(tree, validity)
    }

    /// Caller-supplied validity, e.g. the validity of the document the
    /// literal was extracted from.
    pub fn with_validity(tree: Tree, validity: Validity) -> Self {
        Self {
            base: ProcessorBase::new("literal-generator").with_output(PortInfo::new(PORT_DATA)),
            tree,
            validity,
            cache: OutputCache::new(),
        }
    }
}

impl Processor for LiteralGenerator {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn read_impl(
        &self,
        output: &str,
        _context: &ExecutionContext,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.base.check_output(output)?;
        self.tree.replay(sink)
    }

    fn validity(&self, output: &str, _context: &ExecutionContext) -> Result<Validity> {
        self.base.check_output(output)?;
        Ok(self.validity.clone())
    }

    fn cache(&self, _output: &str) -> Option<&OutputCache> {
        Some(&self.cache)
    }
}

/// Fetches an external resource: a file holding the JSON encoding of a tree.
///
/// Validity is the file's last-modified time; when that cannot be determined
/// the generator degrades to never-cacheable rather than failing.
pub struct ResourceGenerator {
    base: ProcessorBase,
    path: PathBuf,
    cache: OutputCache,
}

impl ResourceGenerator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            base: ProcessorBase::new("resource-generator").with_output(PortInfo::new(PORT_DATA)),
            path: path.into(),
            cache: OutputCache::new(),
        }
    }

    fn load(&self) -> Result<Tree> {
        let text = fs::read_to_string(&self.path).map_err(|err| {
            PipeError::Resource(format!(
                "Cannot read resource '{}': {}",
                self.path.display(),
                err
            ))
        })?;
        serde_json::from_str(&text).map_err(|err| {
            PipeError::Resource(format!(
                "Cannot decode resource '{}': {}",
                self.path.display(),
                err
            ))
        })
    }
}

impl Processor for ResourceGenerator {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn read_impl(
        &self,
        output: &str,
        _context: &ExecutionContext,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.base.check_output(output)?;
        self.load()?.replay(sink)
    }

    fn validity(&self, output: &str, _context: &ExecutionContext) -> Result<Validity> {
        self.base.check_output(output)?;
        match fs::metadata(&self.path).and_then(|meta| meta.modified()) {
            Ok(modified) => Ok(Validity::LastModified(DateTime::<Utc>::from(modified))),
            Err(err) => {
                debug!(
                    "Cannot determine validity of '{}', treating as never cacheable: {}",
                    self.path.display(),
                    err
                );
                Ok(Validity::Unknown)
            }
        }
    }

    fn cache(&self, _output: &str) -> Option<&OutputCache> {
        Some(&self.cache)
    }
}
