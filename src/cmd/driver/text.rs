use crate::cmd::definition::ColumnMapping;
use crate::error::CmdError;
use crate::pgcopy::NULL_SEQ;
use crate::value::RawValue;

use super::{CmdRowDriver, missing};

/// A single column sent as raw bytes, NULL as `\N`.
#[derive(Default)]
pub struct TextDriver {
    value: Option<RawValue>,
}

impl TextDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CmdRowDriver for TextDriver {
    fn clear(&mut self) {
        self.value = None;
    }

    fn set_column(&mut self, mapping: &ColumnMapping, value: &RawValue) -> Result<(), CmdError> {
        if value.data.contains(&b'\n') {
            return Err(CmdError::Protocol(format!(
                "column '{}' contains a newline",
                mapping.column.name
            )));
        }
        self.value = Some(value.clone());
        Ok(())
    }

    fn get_column(&self, mapping: &ColumnMapping) -> Result<RawValue, CmdError> {
        self.value.clone().ok_or_else(|| missing(mapping))
    }

    fn encode(&mut self) -> Result<Vec<u8>, CmdError> {
        Ok(match &self.value {
            Some(v) if !v.is_null => v.data.clone(),
            _ => NULL_SEQ.to_vec(),
        })
    }

    fn decode(&mut self, line: &[u8]) -> Result<(), CmdError> {
        self.value = Some(if line == NULL_SEQ {
            RawValue::null()
        } else {
            RawValue::from(line)
        });
        Ok(())
    }
}
