//! JSON configuration of one table and its transformers.
//!
//! ```json
//! {
//!   "schema": "public",
//!   "name": "users",
//!   "columns": [{"name": "id", "type_name": "int4"}, {"name": "email", "type_name": "text"}],
//!   "when": {"column": "id", "is_null": false},
//!   "transformers": [
//!     {"name": "Replace", "params": {"column": "email", "value": "hidden"}},
//!     {"name": "Cmd", "params": {"executable": "./mask", "driver": {"name": "csv"}}}
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::table::{Column, Table, TableDriver};
use crate::types::TypeRegistry;
use crate::validation::ValidationWarnings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    /// Column name to type name, replacing the declared type's codec.
    #[serde(default)]
    pub type_overrides: HashMap<String, String>,
    /// Table-level predicate; rows for which it is false pass unchanged.
    #[serde(default)]
    pub when: Option<WhenConfig>,
    #[serde(default)]
    pub transformers: Vec<TransformerConfig>,
}

impl TableConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn table(&self) -> Table {
        Table::new(&self.schema, &self.name, self.columns.clone())
    }

    /// Builds the table driver against `registry`.
    pub fn driver(
        &self,
        registry: &TypeRegistry,
    ) -> Result<(Arc<TableDriver>, ValidationWarnings), ConfigError> {
        let (driver, warnings) = TableDriver::new(self.table(), registry, &self.type_overrides)?;
        Ok((Arc::new(driver), warnings))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerConfig {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub when: Option<WhenConfig>,
}

impl TransformerConfig {
    /// Deserializes `params` into the transformer's parameter type.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let params = match &self.params {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(params).map_err(|e| ConfigError::InvalidParameter {
            transformer: self.name.clone(),
            parameter: "params".to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetNullParams {
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceParams {
    pub column: String,
    /// Text form of the new value; absent means NULL.
    #[serde(default)]
    pub value: Option<String>,
    /// Check the value against the column type when the transformer is
    /// built.
    #[serde(default)]
    pub validate: bool,
}

/// A structural row predicate: `column = equals` and/or `column IS [NOT]
/// NULL`. Both parts must hold when both are given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhenConfig {
    pub column: String,
    #[serde(default)]
    pub equals: Option<String>,
    #[serde(default)]
    pub is_null: Option<bool>,
}
