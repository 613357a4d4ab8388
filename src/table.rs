//! Table metadata and the driver that binds it to type codecs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RecordError};
use crate::types::{TypeCodec, TypeRegistry};
use crate::validation::{Severity, ValidationWarning, ValidationWarnings};
use crate::value::{RawValue, Value};

/// Static metadata of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    #[serde(default)]
    pub idx: usize,
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub type_oid: u32,
    #[serde(default)]
    pub not_null: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            idx: 0,
            name: name.into(),
            type_name: type_name.into(),
            type_oid: 0,
            not_null: false,
        }
    }

    pub fn with_oid(mut self, oid: u32) -> Self {
        self.type_oid = oid;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    /// Builds a table; each column's `idx` is set to its position.
    pub fn new(schema: impl Into<String>, name: impl Into<String>, columns: Vec<Column>) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(idx, c)| Column { idx, ..c })
            .collect();
        Self {
            schema: schema.into(),
            name: name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Name to index mapping and typed encode/decode for one table.
///
/// Read-only after construction and shared by every row of the table.
pub struct TableDriver {
    table: Table,
    index: HashMap<String, usize>,
    codecs: Vec<Option<Arc<dyn TypeCodec>>>,
}

impl TableDriver {
    /// Resolves a codec for every column.
    ///
    /// A column whose type has no codec yields a warning and can still be
    /// read and written as raw bytes. `overrides` maps column names to type
    /// names; an override naming an unknown column or an unsupported type
    /// is a configuration error.
    pub fn new(
        table: Table,
        registry: &TypeRegistry,
        overrides: &HashMap<String, String>,
    ) -> Result<(Self, ValidationWarnings), ConfigError> {
        let table = Table::new(table.schema, table.name, table.columns);
        for column in overrides.keys() {
            if table.column(column).is_none() {
                return Err(ConfigError::UnknownColumn(column.clone()));
            }
        }

        let mut warnings = ValidationWarnings::new();
        let mut codecs = Vec::with_capacity(table.columns.len());
        for column in &table.columns {
            let codec = match overrides.get(&column.name) {
                Some(type_name) => Some(registry.by_name(type_name).ok_or_else(|| {
                    ConfigError::UnsupportedTypeOverride {
                        column: column.name.clone(),
                        type_name: type_name.clone(),
                    }
                })?),
                None => registry.resolve(&column.type_name, column.type_oid),
            };
            if codec.is_none() {
                warnings.push(
                    ValidationWarning::new()
                        .with_severity(Severity::Warning)
                        .with_msg("column type is not supported: only raw access is available")
                        .add_meta("SchemaName", table.schema.as_str())
                        .add_meta("TableName", table.name.as_str())
                        .add_meta("ColumnName", column.name.as_str())
                        .add_meta("TypeName", column.type_name.as_str()),
                );
            }
            codecs.push(codec);
        }

        let index = table
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.idx))
            .collect();
        Ok((
            Self {
                table,
                index,
                codecs,
            },
            warnings,
        ))
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn columns(&self) -> &[Column] {
        &self.table.columns
    }

    pub fn column_count(&self) -> usize {
        self.table.columns.len()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn column(&self, idx: usize) -> Option<&Column> {
        self.table.columns.get(idx)
    }

    pub fn codec(&self, idx: usize) -> Option<&dyn TypeCodec> {
        self.codecs.get(idx).and_then(|c| c.as_deref())
    }

    fn column_codec(&self, idx: usize) -> Result<(&Column, &dyn TypeCodec), RecordError> {
        let column = self
            .column(idx)
            .ok_or_else(|| RecordError::UnknownColumn(format!("#{idx}")))?;
        let codec = self.codec(idx).ok_or_else(|| RecordError::UnsupportedType {
            column: column.name.clone(),
            type_name: column.type_name.clone(),
        })?;
        Ok((column, codec))
    }

    /// Decodes a raw column value. NULL decodes to [`Value::Null`] without
    /// consulting the codec.
    pub fn decode_value(&self, idx: usize, raw: &RawValue) -> Result<Value, RecordError> {
        if raw.is_null {
            return Ok(Value::Null);
        }
        let (column, codec) = self.column_codec(idx)?;
        codec.decode(&raw.data).map_err(|source| RecordError::Decoding {
            column: column.name.clone(),
            source,
        })
    }

    pub fn encode_value(&self, idx: usize, value: &Value) -> Result<RawValue, RecordError> {
        if value.is_null() {
            return Ok(RawValue::null());
        }
        let (column, codec) = self.column_codec(idx)?;
        codec
            .encode(value)
            .map(RawValue::new)
            .map_err(|source| RecordError::Encoding {
                column: column.name.clone(),
                source,
            })
    }
}

impl fmt::Debug for TableDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDriver")
            .field("table", &self.table.to_string())
            .field("columns", &self.table.columns.len())
            .finish()
    }
}
