use serde::{Deserialize, Serialize};

use crate::core::{PipeError, Result};

/// Declarative description of one named datasource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl DatasourceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            username: None,
            password: None,
        }
    }

    /// Parse a JSON array of datasource entries.
    pub fn parse_all(text: &str) -> Result<Vec<Self>> {
        serde_json::from_str(text).map_err(|err| {
            PipeError::Configuration(format!("Cannot parse datasource configuration: {}", err))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipeError::Configuration(
                "Datasource configuration is missing a name".into(),
            ));
        }
        if self.url.trim().is_empty() {
            return Err(PipeError::Configuration(format!(
                "Datasource '{}' is missing a url",
                self.name
            )));
        }
        Ok(())
    }
}
