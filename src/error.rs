//! Error types for every layer of the anonymization pipeline.
//!
//! Each layer owns one enum. Lower layers are wrapped by higher ones via
//! `#[from]`, so a failure deep inside the row codec surfaces at the
//! pipeline with its row context attached.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::cmd::process::ProcessState;
use crate::validation::ValidationWarnings;

/// Errors raised while decoding or encoding a COPY row.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed escape sequence: lone trailing backslash at byte {offset}")]
    MalformedEscape { offset: usize },

    #[error("column index {idx} out of range (row has {len} columns)")]
    IndexOutOfRange { idx: usize, len: usize },

    #[error("expected {expected} columns but row has {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("column {idx} is not owned by this record view")]
    ColumnDetached { idx: usize },
}

/// Errors raised by a type codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid input for type {type_name}: {reason}")]
    InvalidInput { type_name: String, reason: String },

    #[error("cannot encode {got} value as {type_name}")]
    Mismatch {
        type_name: String,
        got: &'static str,
    },

    #[error("value {value} is out of range for type {type_name}")]
    OutOfRange { type_name: String, value: String },
}

/// Errors raised by name-addressed record access.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("decode column '{column}': {source}")]
    Decoding {
        column: String,
        #[source]
        source: TypeError,
    },

    #[error("encode column '{column}': {source}")]
    Encoding {
        column: String,
        #[source]
        source: TypeError,
    },

    #[error("column '{column}' has unsupported type '{type_name}'")]
    UnsupportedType { column: String, type_name: String },
}

/// Configuration errors. All of them are detected before the first row.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("conflicting column mapping: position {position} is used by '{first}' and '{second}'")]
    ConflictingColumnMapping {
        position: usize,
        first: String,
        second: String,
    },

    #[error(
        "text row driver needs exactly one transferring and one affected column, got {transferring} and {affected}"
    )]
    TooManyColumns { transferring: usize, affected: usize },

    #[error("no affected columns")]
    NoAffectedColumns,

    #[error("type override '{type_name}' for column '{column}' is not supported")]
    UnsupportedTypeOverride { column: String, type_name: String },

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("unknown transformer '{0}'")]
    UnknownTransformer(String),

    #[error("transformer '{transformer}' parameter '{parameter}': {reason}")]
    InvalidParameter {
        transformer: String,
        parameter: String,
        reason: String,
    },

    #[error("transformer '{transformer}' validation failed with {} fatal warning(s)", .warnings.fatal_count())]
    FatalValidation {
        transformer: String,
        warnings: ValidationWarnings,
    },

    #[error("transformer '{transformer}' validation: {source}")]
    Validation {
        transformer: String,
        #[source]
        source: CmdError,
    },

    #[error("parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("read configuration: {0}")]
    Io(#[from] io::Error),
}

/// Coprocess errors. Each failure mode of the external process is a
/// distinct variant: crashed, hung, closed its stream, or misbehaved.
#[derive(Debug, Error)]
pub enum CmdError {
    #[error("start process '{executable}': {source}")]
    Spawn {
        executable: String,
        #[source]
        source: io::Error,
    },

    #[error("process i/o: {0}")]
    Io(#[from] io::Error),

    #[error("process exited with code {actual}, expected {expected}")]
    UnexpectedExitCode { expected: i32, actual: i32 },

    #[error("process closed stream unexpectedly")]
    UnexpectedEof,

    #[error("row transformation timeout")]
    RowTransformationTimeout,

    #[error("validation timeout")]
    ValidationTimeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("process is not running (state {0})")]
    NotRunning(ProcessState),

    #[error("wire protocol: {0}")]
    Protocol(String),

    #[error("json payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv payload: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors returned by `Transformer::init`, `transform` and `done`.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Cmd(#[from] CmdError),

    #[error("transformer '{transformer}': {reason}")]
    Failed { transformer: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl TransformError {
    /// True when the error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransformError::Cancelled | TransformError::Cmd(CmdError::Cancelled))
    }
}

impl From<CodecError> for TransformError {
    fn from(err: CodecError) -> Self {
        TransformError::Record(RecordError::Codec(err))
    }
}

/// Position of a row inside a table stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowContext {
    pub schema: String,
    pub table: String,
    pub line: u64,
}

impl fmt::Display for RowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} line {}", self.schema, self.table, self.line)
    }
}

/// Errors surfaced by a table pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{context}: decode row: {source}")]
    Decode {
        context: RowContext,
        #[source]
        source: CodecError,
    },

    #[error("{context}: transform row: {source}")]
    Transform {
        context: RowContext,
        #[source]
        source: TransformError,
    },

    #[error("{context}: encode row: {source}")]
    Encode {
        context: RowContext,
        #[source]
        source: CodecError,
    },

    #[error("initialize transformer '{transformer}' (#{position}): {source}")]
    Init {
        transformer: String,
        position: usize,
        #[source]
        source: TransformError,
    },

    #[error("start window worker: {0}")]
    Worker(io::Error),

    #[error("terminate transformers: {}", join_errors(.0))]
    Done(Vec<TransformError>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("stream i/o: {0}")]
    Io(#[from] io::Error),

    #[error("pipeline cancelled")]
    Cancelled,
}

fn join_errors(errors: &[TransformError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
