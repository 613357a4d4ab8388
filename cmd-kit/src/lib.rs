//! Child-side toolkit for rowmask command transformers.
//!
//! A toolkit transformer is a binary that the `Cmd` transformer launches
//! with `launch: "toolkit"`. It speaks the same wire formats as the parent
//! and only has to supply a row function:
//!
//! ```no_run
//! use rowmask::cmd::TransformerDefinition;
//! use rowmask_cmd_kit::{CmdRow, Runner, ToolkitError};
//!
//! let definition = TransformerDefinition {
//!     name: "Blank".to_string(),
//!     ..TransformerDefinition::default()
//! };
//! Runner::new(definition)
//!     .run(|row: &mut CmdRow| -> Result<(), ToolkitError> { row.set("email", "") })
//!     .unwrap();
//! ```

pub mod args;
pub mod error;
pub mod row;
pub mod runner;

pub use args::{Mode, ToolkitArgs};
pub use error::ToolkitError;
pub use row::CmdRow;
pub use runner::{Runner, Validator, check_meta, transform_stream};
