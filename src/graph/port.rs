/// Conventional port names shared by most processors.
pub const PORT_DATA: &str = "data";
pub const PORT_CONFIG: &str = "config";

/// Declaration of a named port, optionally constrained to a schema.
#[derive(Debug, Clone)]
pub struct PortInfo {
    name: String,
    schema: Option<String>,
}

impl PortInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
        }
    }

    pub fn with_schema(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: Some(schema.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}
