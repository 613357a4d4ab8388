//! Row exchange with a coprocess.
//!
//! [`CmdProto`] turns the transferring columns of a [`Record`] into one
//! payload line and applies the affected columns of the reply line back.
//! Nothing else crosses the process boundary in either direction.

use crate::cancel::CancelToken;
use crate::error::{CmdError, ConfigError, TransformError};
use crate::record::Record;

use super::definition::{ColumnMapping, RowDriverName, RowDriverSetting, check_positions};
use super::driver::{CmdRowDriver, new_driver};

/// A line-oriented, cancellable byte channel to a coprocess.
pub trait LineTransport {
    /// Writes `line`, which already carries its terminator.
    fn write_line(&mut self, line: &[u8], cancel: &CancelToken) -> Result<(), CmdError>;

    /// Reads one line; the terminator is included if the peer sent one.
    fn read_line(&mut self, cancel: &CancelToken) -> Result<Vec<u8>, CmdError>;
}

pub struct CmdProto {
    driver: Box<dyn CmdRowDriver>,
    transferring: Vec<ColumnMapping>,
    affected: Vec<ColumnMapping>,
}

impl CmdProto {
    pub fn new(
        setting: &RowDriverSetting,
        transferring: Vec<ColumnMapping>,
        affected: Vec<ColumnMapping>,
    ) -> Result<Self, ConfigError> {
        if affected.is_empty() {
            return Err(ConfigError::NoAffectedColumns);
        }
        if setting.name == RowDriverName::Text && (transferring.len() != 1 || affected.len() != 1)
        {
            return Err(ConfigError::TooManyColumns {
                transferring: transferring.len(),
                affected: affected.len(),
            });
        }
        if setting.is_positioned() {
            check_positions(&transferring)?;
            check_positions(&affected)?;
        }
        Ok(Self {
            driver: new_driver(setting),
            transferring,
            affected,
        })
    }

    pub fn transferring(&self) -> &[ColumnMapping] {
        &self.transferring
    }

    pub fn affected(&self) -> &[ColumnMapping] {
        &self.affected
    }

    /// Builds the outbound line for `record`, terminator included.
    pub fn encode_payload(&mut self, record: &mut Record) -> Result<Vec<u8>, TransformError> {
        self.driver.clear();
        for mapping in &self.transferring {
            let value = record.get_raw_by_idx(mapping.column.idx)?;
            self.driver.set_column(mapping, value)?;
        }
        let mut line = self.driver.encode()?;
        line.push(b'\n');
        Ok(line)
    }

    pub fn send<T: LineTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        record: &mut Record,
        cancel: &CancelToken,
    ) -> Result<(), TransformError> {
        let line = self.encode_payload(record)?;
        transport.write_line(&line, cancel)?;
        Ok(())
    }

    /// Decodes a reply line and writes the affected columns into `record`.
    pub fn apply_payload(
        &mut self,
        line: &[u8],
        record: &mut Record,
    ) -> Result<(), TransformError> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        self.driver.decode(line)?;
        for mapping in &self.affected {
            let value = self.driver.get_column(mapping)?;
            record.set_raw_by_idx(mapping.column.idx, value)?;
        }
        Ok(())
    }

    pub fn receive_and_apply<T: LineTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        record: &mut Record,
        cancel: &CancelToken,
    ) -> Result<(), TransformError> {
        let line = transport.read_line(cancel)?;
        self.apply_payload(&line, record)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::cmd::definition::{CmdColumn, ColumnSets, JsonColumnFormat, JsonDataFormat};
    use crate::table::{Column, Table};
    use crate::testing::{driver_for, encoded, record_with, users_driver};

    #[derive(Default)]
    struct Loopback {
        written: Vec<Vec<u8>>,
        replies: VecDeque<Vec<u8>>,
    }

    impl LineTransport for Loopback {
        fn write_line(&mut self, line: &[u8], _cancel: &CancelToken) -> Result<(), CmdError> {
            self.written.push(line.to_vec());
            Ok(())
        }

        fn read_line(&mut self, _cancel: &CancelToken) -> Result<Vec<u8>, CmdError> {
            self.replies.pop_front().ok_or(CmdError::UnexpectedEof)
        }
    }

    fn mapping(driver: &crate::table::TableDriver, name: &str, position: usize) -> ColumnMapping {
        let idx = driver.index_of(name).unwrap();
        ColumnMapping {
            column: driver.columns()[idx].clone(),
            position,
        }
    }

    #[test]
    fn test_csv_sends_transferring_applies_affected() {
        let driver = driver_for(Table::new(
            "public",
            "t",
            vec![
                Column::new("col0", "text"),
                Column::new("col1", "text"),
                Column::new("col2", "text"),
            ],
        ));
        let mut proto = CmdProto::new(
            &RowDriverSetting::csv(),
            vec![mapping(&driver, "col0", 0), mapping(&driver, "col2", 1)],
            vec![mapping(&driver, "col0", 0)],
        )
        .unwrap();
        let mut record = crate::record::Record::new(driver);
        record.set_row(b"a\tb\tc").unwrap();

        let mut wire = Loopback::default();
        wire.replies.push_back(b"x,y\n".to_vec());
        let cancel = CancelToken::new();
        proto.send(&mut wire, &mut record, &cancel).unwrap();
        proto.receive_and_apply(&mut wire, &mut record, &cancel).unwrap();

        assert_eq!(wire.written, vec![b"a,c\n".to_vec()]);
        assert_eq!(encoded(&record), "x\tb\tc");
    }

    #[test]
    fn test_columns_do_not_leak() {
        let driver = users_driver();
        let columns = vec![
            CmdColumn {
                not_affected: true,
                ..CmdColumn::new("name")
            },
            CmdColumn {
                skip_original_data: true,
                ..CmdColumn::new("email")
            },
        ];
        let sets = ColumnSets::resolve(&driver, &columns).unwrap();
        let setting = RowDriverSetting::json(JsonDataFormat::Text, JsonColumnFormat::Names);
        let mut proto = CmdProto::new(&setting, sets.transferring, sets.affected).unwrap();

        let mut record = record_with(b"7\tAlice\ta@b.c");
        let payload = proto.encode_payload(&mut record).unwrap();
        assert_eq!(payload, b"{\"name\":{\"d\":\"Alice\",\"n\":false}}\n".to_vec());

        let reply = br#"{"id":{"d":"99"},"name":{"d":"Mallory"},"email":{"d":"x@y.z"}}"#;
        proto.apply_payload(reply, &mut record).unwrap();
        assert_eq!(encoded(&record), "7\tAlice\tx@y.z");
    }

    #[test]
    fn test_json_by_index_round_trip_with_null() {
        let driver = users_driver();
        let sets = ColumnSets::resolve(&driver, &[CmdColumn::new("email")]).unwrap();
        let mut proto =
            CmdProto::new(&RowDriverSetting::default(), sets.transferring, sets.affected).unwrap();
        let mut record = record_with(b"1\tBob\t\\N");
        assert_eq!(
            proto.encode_payload(&mut record).unwrap(),
            b"[{\"d\":\"\",\"n\":true}]\n".to_vec()
        );
        proto.apply_payload(b"[{\"d\":\"masked\"}]\n", &mut record).unwrap();
        assert_eq!(encoded(&record), "1\tBob\tmasked");
    }

    #[test]
    fn test_text_requires_single_columns() {
        let driver = users_driver();
        let err = CmdProto::new(
            &RowDriverSetting::text(),
            vec![mapping(&driver, "id", 0), mapping(&driver, "name", 1)],
            vec![mapping(&driver, "name", 0)],
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            ConfigError::TooManyColumns {
                transferring: 2,
                affected: 1
            }
        ));
    }

    #[test]
    fn test_text_round_trip() {
        let driver = users_driver();
        let mut proto = CmdProto::new(
            &RowDriverSetting::text(),
            vec![mapping(&driver, "name", 0)],
            vec![mapping(&driver, "name", 0)],
        )
        .unwrap();
        let mut record = record_with(b"1\tA\\tB\tc");
        assert_eq!(proto.encode_payload(&mut record).unwrap(), b"A\tB\n".to_vec());
        proto.apply_payload(b"\\N\n", &mut record).unwrap();
        assert_eq!(encoded(&record), "1\t\\N\tc");
    }

    #[test]
    fn test_no_affected_columns() {
        let driver = users_driver();
        let err = CmdProto::new(&RowDriverSetting::csv(), vec![mapping(&driver, "id", 0)], vec![])
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::NoAffectedColumns));
    }

    #[test]
    fn test_conflicting_mapping_only_for_positioned_formats() {
        let driver = users_driver();
        let transferring = vec![mapping(&driver, "id", 0), mapping(&driver, "name", 0)];
        let affected = vec![mapping(&driver, "name", 0)];
        assert!(matches!(
            CmdProto::new(&RowDriverSetting::csv(), transferring.clone(), affected.clone()),
            Err(ConfigError::ConflictingColumnMapping { position: 0, .. })
        ));
        let by_name = RowDriverSetting::json(JsonDataFormat::Text, JsonColumnFormat::Names);
        assert!(CmdProto::new(&by_name, transferring, affected).is_ok());
    }

    #[test]
    fn test_missing_reply_is_eof() {
        let driver = users_driver();
        let mut proto = CmdProto::new(
            &RowDriverSetting::csv(),
            vec![mapping(&driver, "id", 0)],
            vec![mapping(&driver, "id", 0)],
        )
        .unwrap();
        let mut record = record_with(b"1\ta\tb");
        let err = proto
            .receive_and_apply(&mut Loopback::default(), &mut record, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, TransformError::Cmd(CmdError::UnexpectedEof)));
    }
}
