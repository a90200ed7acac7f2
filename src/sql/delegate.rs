//! Vendor-specific type handling.
//!
//! A delegate customizes how parameter values are bound and how column
//! values are read for one database product. Selection happens once per
//! connection, by product name, from a static strategy table with a generic
//! fallback; the result is cached per datasource for the rest of the
//! execution context.

use std::sync::Arc;

use lazy_static::lazy_static;
use log::info;

use crate::core::{Result, Value};
use crate::db::{PreparedStatement, RowCursor};

pub trait DatabaseDelegate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bind one positional parameter (1-based index).
    fn bind(
        &self,
        statement: &mut dyn PreparedStatement,
        index: usize,
        value: Value,
    ) -> Result<()>;

    /// Read one column of the current row in its serialized text form.
    fn column_text(&self, cursor: &dyn RowCursor, column: &str) -> Result<String>;
}

/// Default behavior: values pass through untouched.
pub struct GenericDelegate;

impl DatabaseDelegate for GenericDelegate {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn bind(
        &self,
        statement: &mut dyn PreparedStatement,
        index: usize,
        value: Value,
    ) -> Result<()> {
        statement.bind(index, value)
    }

    fn column_text(&self, cursor: &dyn RowCursor, column: &str) -> Result<String> {
        cursor.value(column)?.serialize()
    }
}

/// Oracle stores empty strings as NULL; bind them as NULL up front so
/// comparisons behave the same on every product.
pub struct OracleDelegate;

impl DatabaseDelegate for OracleDelegate {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn bind(
        &self,
        statement: &mut dyn PreparedStatement,
        index: usize,
        value: Value,
    ) -> Result<()> {
        let value = match value {
            Value::Text(text) if text.is_empty() => Value::Null,
            other => other,
        };
        statement.bind(index, value)
    }

    fn column_text(&self, cursor: &dyn RowCursor, column: &str) -> Result<String> {
        cursor.value(column)?.serialize()
    }
}

lazy_static! {
    /// Capability-tagged implementations keyed by a product-name fragment.
    static ref DELEGATES: Vec<(&'static str, Arc<dyn DatabaseDelegate>)> =
        vec![("oracle", Arc::new(OracleDelegate) as Arc<dyn DatabaseDelegate>)];
    static ref GENERIC: Arc<dyn DatabaseDelegate> = Arc::new(GenericDelegate);
}

/// Select the delegate for a reported product name; the generic delegate is
/// the explicit fallback and selection never fails.
pub fn delegate_for_product(product: &str) -> Arc<dyn DatabaseDelegate> {
    let product = product.to_lowercase();
    for (key, delegate) in DELEGATES.iter() {
        if product.contains(key) {
            info!("Using {} database delegate", delegate.name());
            return Arc::clone(delegate);
        }
    }
    info!("Using generic database delegate");
    Arc::clone(&GENERIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_name_selects_delegate_with_generic_fallback() {
        assert_eq!(delegate_for_product("Oracle Database 19c").name(), "oracle");
        assert_eq!(delegate_for_product("PostgreSQL").name(), "generic");
    }
}
