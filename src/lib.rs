//! # rowmask
//!
//! Streaming anonymization of PostgreSQL `COPY ... TO STDOUT` text data.
//!
//! ## Overview
//!
//! A table dump is read one line at a time. Each line becomes a
//! [`Record`] whose columns are decoded lazily, and is handed to the
//! table's transformers:
//! - **In-process transformers** such as [`SetNull`] and [`Replace`]
//! - **Command transformers** ([`CmdTransformer`]) that delegate each row to
//!   an external process over a line-oriented wire protocol
//!
//! Transformers touching disjoint columns are grouped into windows whose
//! members run concurrently on the same row; windows run in configuration
//! order. Rows leave the pipeline in the order they arrived, and columns no
//! transformer changed are written back byte for byte.
//!
//! ## Example
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use rowmask::{CancelToken, Column, Table, TableDriver, TransformationPipeline};
//! use rowmask::{SetNull, TransformerContext, TypeRegistry};
//!
//! let table = Table::new(
//!     "public",
//!     "users",
//!     vec![Column::new("id", "int4"), Column::new("email", "text")],
//! );
//! let (driver, _) = TableDriver::new(table, &TypeRegistry::postgres(), &HashMap::new()).unwrap();
//! let driver = Arc::new(driver);
//!
//! let mask = SetNull::new(&driver, "email").unwrap();
//! let mut pipeline = TransformationPipeline::new(
//!     driver,
//!     vec![TransformerContext::new(Box::new(mask))],
//!     CancelToken::new(),
//! );
//! pipeline.init().unwrap();
//!
//! let mut out = Vec::new();
//! pipeline.run(&b"1\ta@b.c\n\\.\n"[..], &mut out).unwrap();
//! pipeline.done().unwrap();
//! assert_eq!(out, b"1\t\\N\n\\.\n");
//! ```

pub mod cancel;
pub mod cmd;
pub mod config;
pub mod error;
pub mod logging;
pub mod pgcopy;
pub mod pipeline;
pub mod record;
pub mod table;
pub mod transformers;
pub mod types;
pub mod validation;
pub mod value;

#[cfg(test)]
mod testing;

pub use cancel::CancelToken;
pub use cmd::{CmdSettings, CmdTransformer, RowDriverSetting};
pub use config::TableConfig;
pub use error::{
    CmdError, CodecError, ConfigError, PipelineError, RecordError, TransformError, TypeError,
};
pub use pgcopy::Row;
pub use pipeline::{PipelineStats, TransformationPipeline, TransformationWindow};
pub use record::Record;
pub use table::{Column, Table, TableDriver};
pub use transformers::{
    Condition, Replace, SetNull, Transformer, TransformerContext, build_condition,
    build_transformers,
};
pub use types::{TypeCodec, TypeRegistry};
pub use validation::{Severity, ValidationWarning, ValidationWarnings};
pub use value::{RawValue, Value};
