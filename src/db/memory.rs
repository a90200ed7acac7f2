//! In-process scripted datasource.
//!
//! Statements are registered up front with canned results; connections
//! journal every execution, commit, and rollback so callers can assert on
//! the transactional behavior of a pipeline run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::core::{PipeError, Result, Value};
use crate::db::{Datasource, PreparedStatement, RowCursor, SqlConnection};

#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    Opened,
    Executed { sql: String, params: Vec<Value> },
    Committed,
    RolledBack,
}

#[derive(Clone)]
enum Scripted {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Affected(u64),
}

struct Inner {
    product: String,
    scripts: RwLock<HashMap<String, Scripted>>,
    journal: Mutex<Vec<JournalEntry>>,
}

impl Inner {
    fn record(&self, entry: JournalEntry) -> Result<()> {
        self.journal.lock()?.push(entry);
        Ok(())
    }
}

/// Collapse whitespace so scripted statements match regardless of template
/// indentation.
fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct MemoryDatasource {
    inner: Arc<Inner>,
}

impl MemoryDatasource {
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                product: product.into(),
                scripts: RwLock::new(HashMap::new()),
                journal: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Script a query statement: executing it yields the given rows.
    pub fn script_query(
        &self,
        sql: &str,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<()> {
        let mut scripts = self.inner.scripts.write()?;
        scripts.insert(
            normalize(sql),
            Scripted::Rows {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        );
        Ok(())
    }

    /// Script a mutation statement: executing it yields an affected count.
    pub fn script_update(&self, sql: &str, affected: u64) -> Result<()> {
        let mut scripts = self.inner.scripts.write()?;
        scripts.insert(normalize(sql), Scripted::Affected(affected));
        Ok(())
    }

    pub fn journal(&self) -> Result<Vec<JournalEntry>> {
        Ok(self.inner.journal.lock()?.clone())
    }

    pub fn open_count(&self) -> Result<usize> {
        self.count(&JournalEntry::Opened)
    }

    pub fn commit_count(&self) -> Result<usize> {
        self.count(&JournalEntry::Committed)
    }

    pub fn rollback_count(&self) -> Result<usize> {
        self.count(&JournalEntry::RolledBack)
    }

    fn count(&self, wanted: &JournalEntry) -> Result<usize> {
        Ok(self
            .inner
            .journal
            .lock()?
            .iter()
            .filter(|entry| *entry == wanted)
            .count())
    }
}

impl Datasource for MemoryDatasource {
    fn connect(&self) -> Result<Box<dyn SqlConnection>> {
        debug!("Opening in-memory connection ({})", self.inner.product);
        self.inner.record(JournalEntry::Opened)?;
        Ok(Box::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryConnection {
    inner: Arc<Inner>,
}

impl SqlConnection for MemoryConnection {
    fn product_name(&self) -> &str {
        &self.inner.product
    }

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let normalized = normalize(sql);
        let script = {
            let scripts = self.inner.scripts.read()?;
            scripts.get(&normalized).cloned()
        };
        let script = script.ok_or_else(|| {
            PipeError::Statement(format!("No scripted result for statement: {}", normalized))
        })?;
        Ok(Box::new(MemoryStatement {
            inner: Arc::clone(&self.inner),
            sql: normalized,
            script,
            params: Vec::new(),
        }))
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.record(JournalEntry::Committed)
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner.record(JournalEntry::RolledBack)
    }
}

struct MemoryStatement {
    inner: Arc<Inner>,
    sql: String,
    script: Scripted,
    params: Vec<Value>,
}

impl MemoryStatement {
    fn record_execution(&self) -> Result<()> {
        self.inner.record(JournalEntry::Executed {
            sql: self.sql.clone(),
            params: self.params.clone(),
        })
    }
}

impl PreparedStatement for MemoryStatement {
    fn bind(&mut self, index: usize, value: Value) -> Result<()> {
        if index == 0 {
            return Err(PipeError::Statement(
                "Parameter indexes are 1-based".into(),
            ));
        }
        if self.params.len() < index {
            self.params.resize(index, Value::Null);
        }
        self.params[index - 1] = value;
        Ok(())
    }

    fn query(&mut self) -> Result<Box<dyn RowCursor>> {
        self.record_execution()?;
        match &self.script {
            Scripted::Rows { columns, rows } => Ok(Box::new(MemoryCursor {
                columns: columns.clone(),
                rows: rows.clone(),
                position: None,
            })),
            Scripted::Affected(_) => Err(PipeError::Statement(format!(
                "Statement is scripted as a mutation, not a query: {}",
                self.sql
            ))),
        }
    }

    fn execute(&mut self) -> Result<u64> {
        self.record_execution()?;
        match &self.script {
            Scripted::Affected(count) => Ok(*count),
            Scripted::Rows { .. } => Err(PipeError::Statement(format!(
                "Statement is scripted as a query, not a mutation: {}",
                self.sql
            ))),
        }
    }
}

struct MemoryCursor {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    position: Option<usize>,
}

impl RowCursor for MemoryCursor {
    fn advance(&mut self) -> Result<bool> {
        let next = match self.position {
            None => 0,
            Some(current) => current + 1,
        };
        if next < self.rows.len() {
            self.position = Some(next);
            Ok(true)
        } else {
            self.position = Some(self.rows.len());
            Ok(false)
        }
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn value(&self, column: &str) -> Result<Value> {
        let row = self
            .position
            .filter(|position| *position < self.rows.len())
            .map(|position| &self.rows[position])
            .ok_or_else(|| {
                PipeError::Statement("Cursor is not positioned on a row".into())
            })?;
        let index = self
            .columns
            .iter()
            .position(|name| name == column)
            .ok_or_else(|| {
                PipeError::Statement(format!("Result has no column named '{}'", column))
            })?;
        Ok(row[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_query_round_trip() {
        let datasource = MemoryDatasource::new("memdb");
        datasource
            .script_query(
                "select name from users",
                &["name"],
                vec![vec![Value::Text("a".into())], vec![Value::Text("b".into())]],
            )
            .unwrap();

        let mut connection = datasource.connect().unwrap();
        let mut statement = connection.prepare("select  name\nfrom users").unwrap();
        let mut cursor = statement.query().unwrap();

        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value("name").unwrap(), Value::Text("a".into()));
        assert!(cursor.advance().unwrap());
        assert!(!cursor.advance().unwrap());
        assert!(cursor.value("name").is_err());
    }

    #[test]
    fn journal_records_params_and_teardown() {
        let datasource = MemoryDatasource::new("memdb");
        datasource.script_update("delete from t where id = ?", 3).unwrap();

        let mut connection = datasource.connect().unwrap();
        let mut statement = connection.prepare("delete from t where id = ?").unwrap();
        statement.bind(1, Value::Integer(9)).unwrap();
        assert_eq!(statement.execute().unwrap(), 3);
        connection.commit().unwrap();

        let journal = datasource.journal().unwrap();
        assert_eq!(
            journal,
            vec![
                JournalEntry::Opened,
                JournalEntry::Executed {
                    sql: "delete from t where id = ?".into(),
                    params: vec![Value::Integer(9)],
                },
                JournalEntry::Committed,
            ]
        );
    }
}
