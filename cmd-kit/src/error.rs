use std::io;

use rowmask::{CmdError, ConfigError, RecordError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolkitError {
    #[error("--meta is required with --{0}")]
    MissingMeta(&'static str),

    #[error("column '{0}' is not part of this row")]
    UnknownColumn(String),

    #[error("affected column '{0}' was never set")]
    MissingColumn(String),

    #[error("row {line}: {reason}")]
    Transform { line: u64, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cmd(#[from] CmdError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}
