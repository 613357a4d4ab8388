//! The row handed to a toolkit transformer.

use std::collections::BTreeMap;
use std::sync::Arc;

use rowmask::{RawValue, TableDriver, Value};

use crate::error::ToolkitError;

/// Columns of one payload line, by name.
///
/// Holds the transferring columns as received. Affected columns are read
/// back after the row function returns, so a transformer writes its output
/// with [`CmdRow::set`] or [`CmdRow::set_value`].
pub struct CmdRow {
    driver: Arc<TableDriver>,
    values: BTreeMap<String, RawValue>,
}

impl CmdRow {
    pub(crate) fn new(driver: Arc<TableDriver>) -> Self {
        Self {
            driver,
            values: BTreeMap::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }

    /// Names of the columns currently held.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.values.get(name)
    }

    /// The column as UTF-8; `None` for NULL, absent or non-UTF-8 data.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(RawValue::as_str)
    }

    pub fn set(&mut self, name: &str, value: impl Into<RawValue>) -> Result<(), ToolkitError> {
        self.check(name)?;
        self.values.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn set_null(&mut self, name: &str) -> Result<(), ToolkitError> {
        self.set(name, RawValue::null())
    }

    /// Decodes the column with its type codec.
    pub fn value(&self, name: &str) -> Result<Value, ToolkitError> {
        let idx = self.check(name)?;
        match self.values.get(name) {
            Some(raw) => Ok(self.driver.decode_value(idx, raw)?),
            None => Err(ToolkitError::MissingColumn(name.to_string())),
        }
    }

    /// Encodes `value` with the column's type codec and stores it.
    pub fn set_value(&mut self, name: &str, value: &Value) -> Result<(), ToolkitError> {
        let idx = self.check(name)?;
        let raw = self.driver.encode_value(idx, value)?;
        self.values.insert(name.to_string(), raw);
        Ok(())
    }

    /// Type name of a table column.
    pub fn type_name(&self, name: &str) -> Option<&str> {
        let idx = self.driver.index_of(name)?;
        self.driver.column(idx).map(|c| c.type_name.as_str())
    }

    fn check(&self, name: &str) -> Result<usize, ToolkitError> {
        self.driver
            .index_of(name)
            .ok_or_else(|| ToolkitError::UnknownColumn(name.to_string()))
    }
}
