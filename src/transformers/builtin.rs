//! In-process transformers.

use crate::cancel::CancelToken;
use crate::error::{ConfigError, TransformError};
use crate::record::Record;
use crate::table::TableDriver;
use crate::value::RawValue;

use super::Transformer;

fn resolve(driver: &TableDriver, transformer: &str, column: &str) -> Result<usize, ConfigError> {
    let idx = driver
        .index_of(column)
        .ok_or_else(|| ConfigError::UnknownColumn(column.to_string()))?;
    if driver.column(idx).is_some_and(|c| c.not_null) {
        return Err(ConfigError::InvalidParameter {
            transformer: transformer.to_string(),
            parameter: "column".to_string(),
            reason: format!("column '{column}' is NOT NULL"),
        });
    }
    Ok(idx)
}

/// SetNull column - writes NULL into one column.
pub struct SetNull {
    columns: Vec<String>,
    idx: usize,
}

impl SetNull {
    pub const NAME: &'static str = "SetNull";

    pub fn new(driver: &TableDriver, column: &str) -> Result<Self, ConfigError> {
        let idx = resolve(driver, Self::NAME, column)?;
        Ok(Self {
            columns: vec![column.to_string()],
            idx,
        })
    }
}

impl Transformer for SetNull {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn declared_columns(&self) -> &[String] {
        &self.columns
    }

    fn read_columns(&self) -> Vec<String> {
        Vec::new()
    }

    fn transform(
        &mut self,
        record: &mut Record,
        _cancel: &CancelToken,
    ) -> Result<(), TransformError> {
        record.set_raw_by_idx(self.idx, RawValue::null())?;
        Ok(())
    }
}

/// Replace column value - writes a constant into one column.
///
/// The constant is given in the column's text form. With `validate` set it
/// is checked against the column type once, at construction.
pub struct Replace {
    columns: Vec<String>,
    idx: usize,
    value: RawValue,
}

impl Replace {
    pub const NAME: &'static str = "Replace";

    pub fn new(
        driver: &TableDriver,
        column: &str,
        value: Option<&str>,
        validate: bool,
    ) -> Result<Self, ConfigError> {
        let idx = match value {
            None => resolve(driver, Self::NAME, column)?,
            Some(_) => driver
                .index_of(column)
                .ok_or_else(|| ConfigError::UnknownColumn(column.to_string()))?,
        };
        let value = value.map_or_else(RawValue::null, RawValue::from);
        if validate {
            driver
                .decode_value(idx, &value)
                .map_err(|e| ConfigError::InvalidParameter {
                    transformer: Self::NAME.to_string(),
                    parameter: "value".to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(Self {
            columns: vec![column.to_string()],
            idx,
            value,
        })
    }
}

impl Transformer for Replace {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn declared_columns(&self) -> &[String] {
        &self.columns
    }

    fn read_columns(&self) -> Vec<String> {
        Vec::new()
    }

    fn transform(
        &mut self,
        record: &mut Record,
        _cancel: &CancelToken,
    ) -> Result<(), TransformError> {
        record.set_raw_by_idx(self.idx, self.value.clone())?;
        Ok(())
    }
}
