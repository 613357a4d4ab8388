use ::csv::{ByteRecord, ReaderBuilder, Terminator, WriterBuilder};

use crate::cmd::definition::ColumnMapping;
use crate::error::CmdError;
use crate::pgcopy::NULL_SEQ;
use crate::value::RawValue;

use super::{CmdRowDriver, missing};

/// One CSV record per line, NULL written as `\N`.
pub struct CsvDriver {
    fields: Vec<RawValue>,
    record: ByteRecord,
}

impl CsvDriver {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            record: ByteRecord::new(),
        }
    }
}

impl Default for CsvDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl CmdRowDriver for CsvDriver {
    fn clear(&mut self) {
        self.fields.clear();
    }

    fn set_column(&mut self, mapping: &ColumnMapping, value: &RawValue) -> Result<(), CmdError> {
        if self.fields.len() <= mapping.position {
            self.fields.resize_with(mapping.position + 1, RawValue::null);
        }
        self.fields[mapping.position] = value.clone();
        Ok(())
    }

    fn get_column(&self, mapping: &ColumnMapping) -> Result<RawValue, CmdError> {
        self.fields
            .get(mapping.position)
            .cloned()
            .ok_or_else(|| missing(mapping))
    }

    fn encode(&mut self) -> Result<Vec<u8>, CmdError> {
        if let Some(pos) = self.fields.iter().position(|f| f.data.contains(&b'\n')) {
            return Err(CmdError::Protocol(format!(
                "csv field {pos} contains a newline"
            )));
        }
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(self.fields.iter().map(|f| {
            if f.is_null { NULL_SEQ } else { f.as_bytes() }
        }))?;
        let mut line = writer.into_inner().map_err(|e| CmdError::Io(e.into_error()))?;
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        Ok(line)
    }

    fn decode(&mut self, line: &[u8]) -> Result<(), CmdError> {
        self.fields.clear();
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(line);
        if reader.read_byte_record(&mut self.record)? {
            self.fields.extend(self.record.iter().map(|f| {
                if f == NULL_SEQ {
                    RawValue::null()
                } else {
                    RawValue::from(f)
                }
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn mapping(name: &str, position: usize) -> ColumnMapping {
        ColumnMapping {
            column: Column::new(name, "text"),
            position,
        }
    }

    #[test]
    fn test_encode_quotes_when_needed() {
        let mut d = CsvDriver::new();
        d.set_column(&mapping("a", 0), &RawValue::from("plain")).unwrap();
        d.set_column(&mapping("b", 1), &RawValue::from("with,comma")).unwrap();
        d.set_column(&mapping("c", 2), &RawValue::null()).unwrap();
        d.set_column(&mapping("d", 3), &RawValue::from("say \"hi\"")).unwrap();
        assert_eq!(
            d.encode().unwrap(),
            b"plain,\"with,comma\",\\N,\"say \"\"hi\"\"\"".to_vec()
        );
    }

    #[test]
    fn test_encode_rejects_newline() {
        let mut d = CsvDriver::new();
        d.set_column(&mapping("a", 0), &RawValue::from("two\nlines")).unwrap();
        assert!(matches!(d.encode(), Err(CmdError::Protocol(_))));
    }

    #[test]
    fn test_decode() {
        let mut d = CsvDriver::new();
        d.decode(b"x,\"y,z\",\\N").unwrap();
        assert_eq!(d.get_column(&mapping("a", 0)).unwrap(), RawValue::from("x"));
        assert_eq!(d.get_column(&mapping("b", 1)).unwrap(), RawValue::from("y,z"));
        assert_eq!(d.get_column(&mapping("c", 2)).unwrap(), RawValue::null());
        assert!(matches!(
            d.get_column(&mapping("d", 3)),
            Err(CmdError::Protocol(_))
        ));
    }

    #[test]
    fn test_clear_then_set_sparse() {
        let mut d = CsvDriver::new();
        d.set_column(&mapping("a", 0), &RawValue::from("1")).unwrap();
        d.clear();
        d.set_column(&mapping("b", 1), &RawValue::from("2")).unwrap();
        assert_eq!(d.encode().unwrap(), b"\\N,2".to_vec());
    }
}
