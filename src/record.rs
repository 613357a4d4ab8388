//! A decoded row bound to its table driver.

use std::sync::Arc;

use crate::error::{CodecError, RecordError};
use crate::pgcopy::Row;
use crate::table::TableDriver;
use crate::value::{RawValue, Value};

/// One table row addressed by column name or index.
///
/// A pipeline keeps a single `Record` per table and feeds it every input
/// line through [`Record::set_row`].
#[derive(Debug, Clone)]
pub struct Record {
    driver: Arc<TableDriver>,
    row: Row,
}

impl Record {
    pub fn new(driver: Arc<TableDriver>) -> Self {
        let row = Row::new(driver.column_count());
        Self { driver, row }
    }

    /// A record over a row of unknown width. Name lookups still go through
    /// the driver; index access is bounded by each decoded line.
    pub fn dynamic(driver: Arc<TableDriver>) -> Self {
        Self {
            driver,
            row: Row::dynamic(),
        }
    }

    pub fn driver(&self) -> &TableDriver {
        &self.driver
    }

    pub fn driver_arc(&self) -> &Arc<TableDriver> {
        &self.driver
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    /// Replaces the current row with a new COPY line.
    pub fn set_row(&mut self, line: &[u8]) -> Result<(), CodecError> {
        self.row.decode(line)
    }

    /// Appends the encoded row to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.row.encode_into(out)
    }

    pub fn column_index(&self, name: &str) -> Result<usize, RecordError> {
        self.driver
            .index_of(name)
            .ok_or_else(|| RecordError::UnknownColumn(name.to_string()))
    }

    pub fn get_raw_by_idx(&mut self, idx: usize) -> Result<&RawValue, RecordError> {
        Ok(self.row.get_column(idx)?)
    }

    pub fn get_raw_by_name(&mut self, name: &str) -> Result<&RawValue, RecordError> {
        let idx = self.column_index(name)?;
        self.get_raw_by_idx(idx)
    }

    pub fn set_raw_by_idx(&mut self, idx: usize, value: RawValue) -> Result<(), RecordError> {
        Ok(self.row.set_column(idx, value)?)
    }

    pub fn set_raw_by_name(&mut self, name: &str, value: RawValue) -> Result<(), RecordError> {
        let idx = self.column_index(name)?;
        self.set_raw_by_idx(idx, value)
    }

    pub fn get_value_by_idx(&mut self, idx: usize) -> Result<Value, RecordError> {
        let raw = self.row.get_column(idx)?;
        self.driver.decode_value(idx, raw)
    }

    pub fn get_value_by_name(&mut self, name: &str) -> Result<Value, RecordError> {
        let idx = self.column_index(name)?;
        self.get_value_by_idx(idx)
    }

    pub fn set_value_by_idx(&mut self, idx: usize, value: &Value) -> Result<(), RecordError> {
        let raw = self.driver.encode_value(idx, value)?;
        self.set_raw_by_idx(idx, raw)
    }

    pub fn set_value_by_name(&mut self, name: &str, value: &Value) -> Result<(), RecordError> {
        let idx = self.column_index(name)?;
        self.set_value_by_idx(idx, value)
    }

    /// Splits off a view owning only `columns`. See [`Row::detach`].
    pub fn detach(&mut self, columns: &[usize]) -> Result<Record, CodecError> {
        Ok(Record {
            driver: Arc::clone(&self.driver),
            row: self.row.detach(columns)?,
        })
    }

    pub fn attach(&mut self, part: Record) -> Result<(), CodecError> {
        self.row.attach(part.row)
    }
}
