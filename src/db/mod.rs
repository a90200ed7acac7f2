//! The relational-datasource boundary.
//!
//! The engine treats connection provisioning as a black box: a
//! [`DatasourceRegistry`] installed into the execution context hands out
//! [`Datasource`]s by name, and everything past [`SqlConnection::prepare`]
//! is driver territory. [`memory::MemoryDatasource`] is the in-process
//! implementation used by tests and demos.

pub mod config;
pub mod memory;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::context::ExecutionContext;
use crate::core::{PipeError, Result, Value};

pub use config::DatasourceConfig;
pub use memory::{JournalEntry, MemoryDatasource};

/// Context attribute key under which the datasource registry is installed.
pub const DATASOURCE_REGISTRY_KEY: &str = "datasource-registry";

/// Connection provider for one named datasource.
pub trait Datasource: Send + Sync {
    fn connect(&self) -> Result<Box<dyn SqlConnection>>;
}

/// One live connection. Commit/rollback is driven exclusively by context
/// teardown listeners; the interpreter never calls either mid-run.
pub trait SqlConnection: Send {
    /// Reported product name, used for delegate selection.
    fn product_name(&self) -> &str;

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

/// A prepared statement with positional parameters (1-based, as SQL drivers
/// count them).
pub trait PreparedStatement: Send {
    fn bind(&mut self, index: usize, value: Value) -> Result<()>;

    /// Run as a query, producing a cursor.
    fn query(&mut self) -> Result<Box<dyn RowCursor>>;

    /// Run as a mutation, producing the affected-row count.
    fn execute(&mut self) -> Result<u64>;
}

/// Forward-only cursor over a query result.
pub trait RowCursor: Send {
    /// Advance to the next row; `false` once the result is exhausted.
    fn advance(&mut self) -> Result<bool>;

    fn columns(&self) -> &[String];

    /// Column value of the current row.
    fn value(&self, column: &str) -> Result<Value>;
}

/// Maps datasource names to providers; the external connection-provisioning
/// facility as the engine sees it.
pub struct DatasourceRegistry {
    datasources: Mutex<HashMap<String, Arc<dyn Datasource>>>,
}

impl DatasourceRegistry {
    pub fn new() -> Self {
        Self {
            datasources: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        datasource: Arc<dyn Datasource>,
    ) -> Result<()> {
        let mut datasources = self.datasources.lock()?;
        datasources.insert(name.into(), datasource);
        Ok(())
    }

    /// Validate a configuration entry and register the datasource under its
    /// configured name.
    pub fn register_config(
        &self,
        config: &DatasourceConfig,
        datasource: Arc<dyn Datasource>,
    ) -> Result<()> {
        config.validate()?;
        self.register(config.name.clone(), datasource)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Datasource>> {
        let datasources = self.datasources.lock()?;
        datasources
            .get(name)
            .cloned()
            .ok_or_else(|| PipeError::NoSuchDatasource(name.to_string()))
    }

    /// Install this registry into an execution context so interpreter nodes
    /// can reach it.
    pub fn install(self: &Arc<Self>, context: &ExecutionContext) -> Result<()> {
        context.set_attribute(DATASOURCE_REGISTRY_KEY, Arc::clone(self))
    }

    pub fn from_context(context: &ExecutionContext) -> Result<Arc<DatasourceRegistry>> {
        match context.attribute::<Arc<DatasourceRegistry>>(DATASOURCE_REGISTRY_KEY)? {
            Some(registry) => Ok(Arc::clone(&*registry)),
            None => Err(PipeError::Configuration(
                "No datasource registry installed in this execution context".into(),
            )),
        }
    }
}

impl Default for DatasourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
