//! Wire formats spoken with a coprocess.
//!
//! A row driver holds the columns of one payload line. The parent fills it
//! with transferring columns and encodes it; after reading the reply it
//! decodes the line and reads the affected columns back. The child side in
//! `cmd-kit` uses the same drivers the other way round.

mod csv;
mod json;
mod text;

use crate::error::CmdError;
use crate::value::RawValue;

use super::definition::{ColumnMapping, JsonColumnFormat, RowDriverName, RowDriverSetting};

pub use self::csv::CsvDriver;
pub use self::json::{JsonByIndexDriver, JsonByNameDriver};
pub use self::text::TextDriver;

/// One payload line in a specific wire format.
pub trait CmdRowDriver: Send {
    /// Forgets the columns of the previous line.
    fn clear(&mut self);

    fn set_column(&mut self, mapping: &ColumnMapping, value: &RawValue) -> Result<(), CmdError>;

    fn get_column(&self, mapping: &ColumnMapping) -> Result<RawValue, CmdError>;

    /// Encodes the current columns as one line without a terminator.
    fn encode(&mut self) -> Result<Vec<u8>, CmdError>;

    /// Replaces the current columns with those of `line`.
    fn decode(&mut self, line: &[u8]) -> Result<(), CmdError>;
}

/// Builds the driver selected by `setting`.
pub fn new_driver(setting: &RowDriverSetting) -> Box<dyn CmdRowDriver> {
    match (setting.name, setting.json_column_format) {
        (RowDriverName::Json, JsonColumnFormat::Indexes) => {
            Box::new(JsonByIndexDriver::new(setting.json_data_format))
        }
        (RowDriverName::Json, JsonColumnFormat::Names) => {
            Box::new(JsonByNameDriver::new(setting.json_data_format))
        }
        (RowDriverName::Csv, _) => Box::new(CsvDriver::new()),
        (RowDriverName::Text, _) => Box::new(TextDriver::new()),
    }
}

fn missing(mapping: &ColumnMapping) -> CmdError {
    CmdError::Protocol(format!(
        "column '{}' (position {}) missing from payload",
        mapping.column.name, mapping.position
    ))
}
