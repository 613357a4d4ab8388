//! Transformers backed by an external process.
//!
//! The process reads one payload line per row on stdin and answers with one
//! line on stdout, in one of four wire formats:
//!
//! | format        | line                                         |
//! |---------------|----------------------------------------------|
//! | json, indexes | `[{"d":"..","n":false}, ...]` by position    |
//! | json, names   | `{"col":{"d":"..","n":false}, ...}`          |
//! | csv           | `a,"b,c",\N`                                 |
//! | text          | raw bytes of the single column, `\N` is NULL |
//!
//! Only transferring columns are sent and only affected columns are applied
//! back. The process may also implement `--print-definition` and
//! `--validate --meta <json>`; see [`validate`].

pub mod definition;
pub mod driver;
pub mod process;
pub mod proto;
pub mod transformer;
pub mod validate;

pub use definition::{
    CmdColumn, ColumnMapping, ColumnSets, JsonColumnFormat, JsonDataFormat, Meta,
    ParameterDefinition, RowDriverName, RowDriverSetting, TransformerDefinition,
};
pub use process::{Coprocess, ProcessConfig, ProcessState};
pub use proto::{CmdProto, LineTransport};
pub use transformer::{CmdSettings, CmdTransformer, LaunchMode, SkipBehaviour};
pub use validate::{print_definition, run_validation};
