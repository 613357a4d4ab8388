use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{CmdError, ConfigError, TransformError};
use crate::record::Record;
use crate::table::TableDriver;
use crate::transformers::Transformer;
use crate::validation::ValidationWarnings;

use super::definition::{CmdColumn, ColumnSets, Meta, RowDriverSetting};
use super::process::{Coprocess, ProcessConfig, ProcessState};
use super::proto::CmdProto;
use super::validate::{META_FLAG, run_validation};

/// Flag a toolkit coprocess expects in row mode.
pub const TRANSFORM_FLAG: &str = "--transform";

/// When a row counts as NULL for the `skip_on_null_input` columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipBehaviour {
    /// At least one of the columns is NULL.
    Any,
    /// Every one of the columns is NULL.
    #[default]
    All,
}

/// How the command line is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// `executable args...`
    #[default]
    Plain,
    /// `executable args... --transform --meta <json>`
    Toolkit,
}

fn default_timeout_ms() -> u64 {
    2_000
}

fn default_validation_timeout_ms() -> u64 {
    10_000
}

fn default_termination_grace_ms() -> u64 {
    2_000
}

/// Parameters of a command transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdSettings {
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub driver: RowDriverSetting,
    #[serde(default)]
    pub columns: Vec<CmdColumn>,
    /// Stall watchdog period.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_validation_timeout_ms")]
    pub validation_timeout_ms: u64,
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,
    #[serde(default)]
    pub expected_exit_code: i32,
    #[serde(default)]
    pub skip_on_behaviour: SkipBehaviour,
    /// Decode every applied column with its type codec.
    #[serde(default)]
    pub validate_output: bool,
    /// Run `--validate` when the transformer is built.
    #[serde(default)]
    pub preflight_validation: bool,
    #[serde(default)]
    pub launch: LaunchMode,
    /// Free-form parameters handed to the process in its metadata.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl CmdSettings {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            driver: RowDriverSetting::default(),
            columns: Vec::new(),
            timeout_ms: default_timeout_ms(),
            validation_timeout_ms: default_validation_timeout_ms(),
            termination_grace_ms: default_termination_grace_ms(),
            expected_exit_code: 0,
            skip_on_behaviour: SkipBehaviour::default(),
            validate_output: false,
            preflight_validation: false,
            launch: LaunchMode::default(),
            parameters: serde_json::Map::new(),
        }
    }
}

/// Delegates each row to an external process.
pub struct CmdTransformer {
    label: String,
    settings: CmdSettings,
    driver: Arc<TableDriver>,
    proto: CmdProto,
    declared: Vec<String>,
    reads: Vec<String>,
    writes: Vec<String>,
    skip_on_null: Vec<usize>,
    process: Option<Coprocess>,
}

impl CmdTransformer {
    pub const NAME: &'static str = "Cmd";

    pub fn new(driver: Arc<TableDriver>, settings: CmdSettings) -> Result<Self, ConfigError> {
        let sets = ColumnSets::resolve(&driver, &settings.columns)?;

        let mut declared: Vec<usize> = sets
            .transferring
            .iter()
            .chain(&sets.affected)
            .map(|m| m.column.idx)
            .chain(sets.skip_on_null.iter().copied())
            .collect();
        declared.sort_unstable();
        declared.dedup();
        let names = |idx: &[usize]| -> Vec<String> {
            idx.iter()
                .filter_map(|&i| driver.column(i))
                .map(|c| c.name.clone())
                .collect()
        };
        let declared = names(&declared);
        let reads = sets.transferring.iter().map(|m| m.column.name.clone()).collect();
        let writes = sets.affected.iter().map(|m| m.column.name.clone()).collect();

        let proto = CmdProto::new(&settings.driver, sets.transferring, sets.affected)?;
        Ok(Self {
            label: format!("{}({})", Self::NAME, settings.executable),
            driver,
            proto,
            declared,
            reads,
            writes,
            skip_on_null: sets.skip_on_null,
            process: None,
            settings,
        })
    }

    pub fn settings(&self) -> &CmdSettings {
        &self.settings
    }

    pub fn meta(&self) -> Meta {
        Meta::new(
            self.driver.table(),
            self.settings.parameters.clone(),
            self.settings.driver,
            self.settings.columns.clone(),
        )
    }

    /// Arguments for row mode.
    pub fn command_args(&self) -> Result<Vec<String>, CmdError> {
        let mut args = self.settings.args.clone();
        if self.settings.launch == LaunchMode::Toolkit {
            args.push(TRANSFORM_FLAG.to_string());
            args.push(META_FLAG.to_string());
            args.push(serde_json::to_string(&self.meta())?);
        }
        Ok(args)
    }

    /// Runs the validation sub-protocol against this transformer's
    /// executable.
    pub fn validate(&self, cancel: &CancelToken) -> Result<ValidationWarnings, CmdError> {
        run_validation(
            &self.settings.executable,
            &self.settings.args,
            &self.meta(),
            self.settings.expected_exit_code,
            Duration::from_millis(self.settings.validation_timeout_ms),
            cancel,
        )
    }

    pub fn process_state(&self) -> ProcessState {
        self.process
            .as_ref()
            .map_or(ProcessState::Created, Coprocess::state)
    }

    fn should_skip(&self, record: &mut Record) -> Result<bool, TransformError> {
        if self.skip_on_null.is_empty() {
            return Ok(false);
        }
        let mut nulls = 0;
        for &idx in &self.skip_on_null {
            if record.get_raw_by_idx(idx)?.is_null {
                nulls += 1;
            }
        }
        Ok(match self.settings.skip_on_behaviour {
            SkipBehaviour::Any => nulls > 0,
            SkipBehaviour::All => nulls == self.skip_on_null.len(),
        })
    }

    fn check_output(&self, record: &mut Record) -> Result<(), TransformError> {
        for mapping in self.proto.affected() {
            let idx = mapping.column.idx;
            if self.driver.codec(idx).is_some() {
                record.get_value_by_idx(idx)?;
            }
        }
        Ok(())
    }
}

impl Transformer for CmdTransformer {
    fn name(&self) -> &str {
        &self.label
    }

    fn declared_columns(&self) -> &[String] {
        &self.declared
    }

    fn read_columns(&self) -> Vec<String> {
        self.reads.clone()
    }

    fn written_columns(&self) -> Vec<String> {
        self.writes.clone()
    }

    fn init(&mut self, cancel: &CancelToken) -> Result<(), TransformError> {
        let config = ProcessConfig {
            executable: self.settings.executable.clone(),
            args: self.command_args()?,
            row_timeout: Duration::from_millis(self.settings.timeout_ms),
            termination_grace: Duration::from_millis(self.settings.termination_grace_ms),
            expected_exit_code: self.settings.expected_exit_code,
            table: self.driver.table().to_string(),
            transformer: self.label.clone(),
        };
        self.process = Some(Coprocess::spawn(config, cancel)?);
        Ok(())
    }

    fn transform(
        &mut self,
        record: &mut Record,
        cancel: &CancelToken,
    ) -> Result<(), TransformError> {
        if cancel.is_cancelled() {
            return Err(TransformError::Cancelled);
        }
        let skip = self.should_skip(record)?;
        let process = self
            .process
            .as_mut()
            .ok_or(CmdError::NotRunning(ProcessState::Created))?;
        if skip {
            return Ok(());
        }
        process.begin_row();
        let exchanged = self
            .proto
            .send(process, record, cancel)
            .and_then(|()| self.proto.receive_and_apply(process, record, cancel));
        process.end_row();
        exchanged?;

        if self.settings.validate_output {
            self.check_output(record)?;
        }
        Ok(())
    }

    fn done(&mut self) -> Result<(), TransformError> {
        if let Some(mut process) = self.process.take() {
            debug!(transformer = %self.label, pid = process.pid(), "closing process");
            process.shutdown()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::definition::JsonColumnFormat;
    use crate::testing::{encoded, record_with, users_driver};

    fn upper_name_settings(executable: &str, args: &[&str]) -> CmdSettings {
        CmdSettings {
            args: args.iter().map(|s| s.to_string()).collect(),
            driver: RowDriverSetting::text(),
            columns: vec![CmdColumn::new("name")],
            timeout_ms: 500,
            termination_grace_ms: 500,
            ..CmdSettings::new(executable)
        }
    }

    #[test]
    fn test_settings_defaults() {
        let s: CmdSettings = serde_json::from_str(r#"{"executable":"x"}"#).unwrap();
        assert_eq!(s, CmdSettings::new("x"));
        assert_eq!(s.timeout_ms, 2_000);
        assert_eq!(s.skip_on_behaviour, SkipBehaviour::All);
        assert_eq!(s.launch, LaunchMode::Plain);
    }

    #[test]
    fn test_footprint() {
        let settings = CmdSettings {
            driver: RowDriverSetting::csv(),
            columns: vec![
                CmdColumn {
                    not_affected: true,
                    ..CmdColumn::new("email")
                },
                CmdColumn::new("name"),
            ],
            ..CmdSettings::new("cat")
        };
        let t = CmdTransformer::new(users_driver(), settings).unwrap();
        assert_eq!(t.declared_columns(), ["name".to_string(), "email".to_string()]);
        assert_eq!(t.read_columns(), vec!["email", "name"]);
        assert_eq!(t.written_columns(), vec!["name"]);
        assert_eq!(t.name(), "Cmd(cat)");
    }

    #[test]
    fn test_configuration_errors_surface_at_construction() {
        let settings = CmdSettings {
            driver: RowDriverSetting::text(),
            ..CmdSettings::new("cat")
        };
        assert!(matches!(
            CmdTransformer::new(users_driver(), settings).err().unwrap(),
            ConfigError::TooManyColumns { .. }
        ));

        let settings = CmdSettings {
            columns: vec![CmdColumn {
                not_affected: true,
                ..CmdColumn::new("id")
            }],
            ..CmdSettings::new("cat")
        };
        assert!(matches!(
            CmdTransformer::new(users_driver(), settings).err().unwrap(),
            ConfigError::NoAffectedColumns
        ));

        let settings = CmdSettings {
            columns: vec![
                CmdColumn::new("name"),
                CmdColumn {
                    not_affected: true,
                    skip_original_data: true,
                    ..CmdColumn::new("id")
                },
            ],
            ..CmdSettings::new("cat")
        };
        assert!(matches!(
            CmdTransformer::new(users_driver(), settings).err().unwrap(),
            ConfigError::InvalidParameter { .. }
        ));
    }

    #[test]
    fn test_toolkit_args_carry_meta() {
        let settings = CmdSettings {
            args: vec!["-x".to_string()],
            launch: LaunchMode::Toolkit,
            ..upper_name_settings("kit", &[])
        };
        let t = CmdTransformer::new(users_driver(), settings).unwrap();
        let args = t.command_args().unwrap();
        assert_eq!(&args[..3], ["-x", "--transform", "--meta"]);
        let meta: Meta = serde_json::from_str(&args[3]).unwrap();
        assert_eq!(meta.table.name, "users");
        assert_eq!(meta.columns, vec![CmdColumn::new("name")]);
    }

    #[test]
    fn test_transform_without_init() {
        let mut t = CmdTransformer::new(users_driver(), upper_name_settings("cat", &[])).unwrap();
        let mut record = record_with(b"1\tbob\tb@x");
        let err = t.transform(&mut record, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, TransformError::Cmd(CmdError::NotRunning(ProcessState::Created))));
    }

    #[cfg(unix)]
    #[test]
    fn test_round_trip_through_shell_filter() {
        let cancel = CancelToken::new();
        let script = r#"while read -r l; do printf '%s\n' "$l" | tr a-z A-Z; done"#;
        let mut t = CmdTransformer::new(users_driver(), upper_name_settings("sh", &["-c", script]))
            .unwrap();
        t.init(&cancel).unwrap();
        assert_eq!(t.process_state(), ProcessState::Running);

        let mut record = record_with(b"1\tbob\tb@x");
        t.transform(&mut record, &cancel).unwrap();
        assert_eq!(encoded(&record), "1\tBOB\tb@x");

        record.set_row(b"2\t\\N\tc@x").unwrap();
        t.transform(&mut record, &cancel).unwrap();
        assert_eq!(encoded(&record), "2\t\\N\tc@x");

        t.done().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_skip_on_null() {
        let cancel = CancelToken::new();
        let settings = CmdSettings {
            driver: RowDriverSetting::json(Default::default(), JsonColumnFormat::Names),
            columns: vec![
                CmdColumn {
                    skip_on_null_input: true,
                    ..CmdColumn::new("name")
                },
                CmdColumn {
                    skip_on_null_input: true,
                    not_affected: true,
                    ..CmdColumn::new("email")
                },
            ],
            skip_on_behaviour: SkipBehaviour::Any,
            ..upper_name_settings("sh", &["-c", "while read l; do echo '{\"name\":{\"d\":\"X\"}}'; done"])
        };
        let mut t = CmdTransformer::new(users_driver(), settings).unwrap();
        t.init(&cancel).unwrap();

        let mut record = record_with(b"1\tbob\t\\N");
        t.transform(&mut record, &cancel).unwrap();
        assert_eq!(encoded(&record), "1\tbob\t\\N");

        record.set_row(b"1\tbob\tb@x").unwrap();
        t.transform(&mut record, &cancel).unwrap();
        assert_eq!(encoded(&record), "1\tX\tb@x");
        t.done().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_output_rejects_bad_value() {
        let cancel = CancelToken::new();
        let settings = CmdSettings {
            driver: RowDriverSetting::text(),
            columns: vec![CmdColumn::new("id")],
            validate_output: true,
            ..upper_name_settings("sh", &["-c", "while read l; do echo abc; done"])
        };
        let mut t = CmdTransformer::new(users_driver(), settings).unwrap();
        t.init(&cancel).unwrap();
        let mut record = record_with(b"1\tbob\tb@x");
        let err = t.transform(&mut record, &cancel).unwrap_err();
        assert!(matches!(err, TransformError::Record(_)), "{err}");
        t.done().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_stalled_process_fails_row() {
        let cancel = CancelToken::new();
        let settings = CmdSettings {
            timeout_ms: 200,
            ..upper_name_settings("sleep", &["30"])
        };
        let mut t = CmdTransformer::new(users_driver(), settings).unwrap();
        t.init(&cancel).unwrap();
        let mut record = record_with(b"1\tbob\tb@x");
        let err = t.transform(&mut record, &cancel).unwrap_err();
        assert!(matches!(err, TransformError::Cmd(CmdError::RowTransformationTimeout)), "{err}");
        assert_eq!(t.process_state(), ProcessState::Terminated);
        assert_eq!(encoded(&record), "1\tbob\tb@x");
        t.done().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_garbled_reply_leaves_process_to_shutdown() {
        let cancel = CancelToken::new();
        let settings = CmdSettings {
            driver: RowDriverSetting::default(),
            timeout_ms: 100,
            ..upper_name_settings("sh", &["-c", "read -r l; echo garbage; cat >/dev/null; exit 3"])
        };
        let mut t = CmdTransformer::new(users_driver(), settings).unwrap();
        t.init(&cancel).unwrap();
        let mut record = record_with(b"1\tbob\tb@x");
        let err = t.transform(&mut record, &cancel).unwrap_err();
        assert!(matches!(err, TransformError::Cmd(CmdError::Json(_))), "{err}");

        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(t.process_state(), ProcessState::Running);
        let err = t.done().unwrap_err();
        assert!(
            matches!(err, TransformError::Cmd(CmdError::UnexpectedExitCode { expected: 0, actual: 3 })),
            "{err}"
        );
    }
}
