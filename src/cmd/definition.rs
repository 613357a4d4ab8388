//! Configuration and metadata shared by both sides of the coprocess
//! protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::table::{Column, Table, TableDriver};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowDriverName {
    #[default]
    Json,
    Csv,
    Text,
}

/// How a JSON attribute carries its data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonDataFormat {
    /// `d` is a UTF-8 string.
    #[default]
    Text,
    /// `d` is base64.
    Bytes,
}

/// How JSON attributes are addressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonColumnFormat {
    /// An array ordered by column mapping position.
    #[default]
    Indexes,
    /// An object keyed by column name.
    Names,
}

/// Wire format selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowDriverSetting {
    #[serde(default)]
    pub name: RowDriverName,
    #[serde(default)]
    pub json_data_format: JsonDataFormat,
    #[serde(default)]
    pub json_column_format: JsonColumnFormat,
}

impl RowDriverSetting {
    pub fn csv() -> Self {
        Self {
            name: RowDriverName::Csv,
            ..Self::default()
        }
    }

    pub fn text() -> Self {
        Self {
            name: RowDriverName::Text,
            ..Self::default()
        }
    }

    pub fn json(data: JsonDataFormat, columns: JsonColumnFormat) -> Self {
        Self {
            name: RowDriverName::Json,
            json_data_format: data,
            json_column_format: columns,
        }
    }

    /// True for formats that place columns by position.
    pub fn is_positioned(&self) -> bool {
        match self.name {
            RowDriverName::Csv => true,
            RowDriverName::Json => self.json_column_format == JsonColumnFormat::Indexes,
            RowDriverName::Text => false,
        }
    }
}

/// Per-column options of a command transformer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdColumn {
    pub name: String,
    /// Sent to the process but never written back.
    #[serde(default)]
    pub not_affected: bool,
    /// Written back but never sent.
    #[serde(default)]
    pub skip_original_data: bool,
    /// Participates in the skip-on-null decision.
    #[serde(default)]
    pub skip_on_null_input: bool,
    /// Slot in positioned formats; defaults to the column's order in its
    /// set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl CmdColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Fixes a column to a wire slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub column: Column,
    pub position: usize,
}

/// Transferring and affected columns resolved against a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSets {
    pub transferring: Vec<ColumnMapping>,
    pub affected: Vec<ColumnMapping>,
    /// Record indices of `skip_on_null_input` columns.
    pub skip_on_null: Vec<usize>,
}

impl ColumnSets {
    /// Resolves column options. With no options every table column is both
    /// sent and written back, positioned at its table index.
    pub fn resolve(driver: &TableDriver, columns: &[CmdColumn]) -> Result<Self, ConfigError> {
        if columns.is_empty() {
            let all: Vec<ColumnMapping> = driver
                .columns()
                .iter()
                .map(|c| ColumnMapping {
                    column: c.clone(),
                    position: c.idx,
                })
                .collect();
            return Ok(Self {
                transferring: all.clone(),
                affected: all,
                skip_on_null: Vec::new(),
            });
        }

        let mut sets = Self::default();
        for option in columns {
            let idx = driver
                .index_of(&option.name)
                .ok_or_else(|| ConfigError::UnknownColumn(option.name.clone()))?;
            if option.skip_original_data && option.not_affected {
                return Err(ConfigError::InvalidParameter {
                    transformer: "Cmd".to_string(),
                    parameter: "columns".to_string(),
                    reason: format!(
                        "column '{}' is neither transferred nor affected",
                        option.name
                    ),
                });
            }
            let column = driver.columns()[idx].clone();
            if !option.skip_original_data {
                let position = option.position.unwrap_or(sets.transferring.len());
                sets.transferring.push(ColumnMapping {
                    column: column.clone(),
                    position,
                });
            }
            if !option.not_affected {
                let position = option.position.unwrap_or(sets.affected.len());
                sets.affected.push(ColumnMapping { column, position });
            }
            if option.skip_on_null_input {
                sets.skip_on_null.push(idx);
            }
        }
        Ok(sets)
    }

    /// Names of transferring and affected columns, deduplicated, in
    /// table order.
    pub fn declared(&self) -> Vec<String> {
        let mut columns: Vec<&Column> = self
            .transferring
            .iter()
            .chain(&self.affected)
            .map(|m| &m.column)
            .collect();
        columns.sort_by_key(|c| c.idx);
        columns.dedup_by_key(|c| c.idx);
        columns.into_iter().map(|c| c.name.clone()).collect()
    }
}

/// Rejects two mappings sharing a position.
pub fn check_positions(mappings: &[ColumnMapping]) -> Result<(), ConfigError> {
    let mut seen: BTreeMap<usize, &str> = BTreeMap::new();
    for m in mappings {
        if let Some(first) = seen.insert(m.position, &m.column.name) {
            return Err(ConfigError::ConflictingColumnMapping {
                position: m.position,
                first: first.to_string(),
                second: m.column.name.clone(),
            });
        }
    }
    Ok(())
}

/// Metadata handed to a toolkit coprocess with `--meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub table: Table,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Type name to OID for every column type of the table.
    #[serde(default)]
    pub types: BTreeMap<String, u32>,
    #[serde(default)]
    pub driver: RowDriverSetting,
    #[serde(default)]
    pub columns: Vec<CmdColumn>,
}

impl Meta {
    pub fn new(
        table: &Table,
        parameters: serde_json::Map<String, serde_json::Value>,
        driver: RowDriverSetting,
        columns: Vec<CmdColumn>,
    ) -> Self {
        let types = table
            .columns
            .iter()
            .map(|c| (c.type_name.clone(), c.type_oid))
            .collect();
        Self {
            table: table.clone(),
            parameters,
            types,
            driver,
            columns,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// What a coprocess prints for `--print-definition`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformerDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
    /// Whether the process implements `--validate`.
    #[serde(default)]
    pub validate: bool,
    #[serde(default)]
    pub expected_exit_code: i32,
    #[serde(default)]
    pub driver: RowDriverSetting,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::users_driver;

    #[test]
    fn test_default_setting_is_json_text_indexes() {
        let s: RowDriverSetting = serde_json::from_str("{}").unwrap();
        assert_eq!(s, RowDriverSetting::json(JsonDataFormat::Text, JsonColumnFormat::Indexes));
        assert!(s.is_positioned());
        assert!(RowDriverSetting::csv().is_positioned());
        assert!(!RowDriverSetting::text().is_positioned());
        assert!(!RowDriverSetting::json(JsonDataFormat::Bytes, JsonColumnFormat::Names).is_positioned());
    }

    #[test]
    fn test_resolve_defaults_to_all_columns() {
        let sets = ColumnSets::resolve(&users_driver(), &[]).unwrap();
        let positions: Vec<usize> = sets.affected.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(sets.transferring, sets.affected);
        assert_eq!(sets.declared(), vec!["id", "name", "email"]);
    }

    #[test]
    fn test_resolve_column_options() {
        let columns = vec![
            CmdColumn {
                not_affected: true,
                skip_on_null_input: true,
                ..CmdColumn::new("email")
            },
            CmdColumn::new("id"),
            CmdColumn {
                skip_original_data: true,
                ..CmdColumn::new("name")
            },
        ];
        let sets = ColumnSets::resolve(&users_driver(), &columns).unwrap();
        let names = |ms: &[ColumnMapping]| -> Vec<(String, usize)> {
            ms.iter().map(|m| (m.column.name.clone(), m.position)).collect()
        };
        assert_eq!(
            names(&sets.transferring),
            vec![("email".to_string(), 0), ("id".to_string(), 1)]
        );
        assert_eq!(
            names(&sets.affected),
            vec![("id".to_string(), 0), ("name".to_string(), 1)]
        );
        assert_eq!(sets.skip_on_null, vec![2]);
        assert_eq!(sets.declared(), vec!["id", "name", "email"]);
    }

    #[test]
    fn test_resolve_rejects_column_with_no_role() {
        let columns = vec![
            CmdColumn::new("id"),
            CmdColumn {
                not_affected: true,
                skip_original_data: true,
                ..CmdColumn::new("email")
            },
        ];
        let err = ColumnSets::resolve(&users_driver(), &columns).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidParameter { parameter, reason, .. }
                if parameter == "columns" && reason.contains("'email'")
        ));
    }

    #[test]
    fn test_resolve_unknown_column() {
        let err = ColumnSets::resolve(&users_driver(), &[CmdColumn::new("nope")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownColumn(_)));
    }

    #[test]
    fn test_conflicting_positions() {
        let columns = vec![
            CmdColumn {
                position: Some(1),
                ..CmdColumn::new("id")
            },
            CmdColumn::new("name"),
        ];
        let sets = ColumnSets::resolve(&users_driver(), &columns).unwrap();
        let err = check_positions(&sets.transferring).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingColumnMapping { position: 1, .. }));
    }

    #[test]
    fn test_meta_round_trips_through_json() {
        let driver = users_driver();
        let meta = Meta::new(
            driver.table(),
            serde_json::Map::new(),
            RowDriverSetting::csv(),
            vec![CmdColumn::new("name")],
        );
        let json = serde_json::to_string(&meta).unwrap();
        let back: Meta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.types.get("int4"), Some(&0));
    }
}
