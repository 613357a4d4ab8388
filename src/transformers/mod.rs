//! The transformer capability.
//!
//! A transformer rewrites some columns of a [`Record`]. Every transformer
//! declares the columns it touches; the pipeline uses those declarations to
//! decide which transformers may run side by side on the same row. A
//! transformer that declares nothing is assumed to touch every column and
//! always runs alone.
//!
//! Two families implement the trait: the in-process transformers in
//! [`builtin`] and [`crate::cmd::CmdTransformer`], which delegates each row
//! to an external process.

pub mod builtin;
pub mod registry;

use crate::cancel::CancelToken;
use crate::error::TransformError;
use crate::record::Record;

pub use builtin::{Replace, SetNull};
pub use registry::{build_condition, build_transformers};

/// A unit of work applied to every row of a table.
pub trait Transformer: Send {
    /// The display name of this transformer.
    fn name(&self) -> &str;

    /// Columns this transformer may read or write. Empty means "any".
    fn declared_columns(&self) -> &[String];

    /// Columns whose incoming value this transformer depends on.
    fn read_columns(&self) -> Vec<String> {
        self.declared_columns().to_vec()
    }

    /// Columns this transformer may overwrite.
    fn written_columns(&self) -> Vec<String> {
        self.declared_columns().to_vec()
    }

    /// Called once before the first row.
    fn init(&mut self, _cancel: &CancelToken) -> Result<(), TransformError> {
        Ok(())
    }

    fn transform(
        &mut self,
        record: &mut Record,
        cancel: &CancelToken,
    ) -> Result<(), TransformError>;

    /// Called once after the last row, or after a failed pipeline init for
    /// transformers that were already initialized.
    fn done(&mut self) -> Result<(), TransformError> {
        Ok(())
    }
}

/// Row predicate deciding whether a transformer (or a whole table) applies.
/// The expression language behind it lives outside the pipeline.
pub type Condition = Box<dyn Fn(&mut Record) -> Result<bool, TransformError> + Send + Sync>;

/// A configured transformer and its optional "when" predicate.
pub struct TransformerContext {
    pub transformer: Box<dyn Transformer>,
    pub when: Option<Condition>,
}

impl TransformerContext {
    pub fn new(transformer: Box<dyn Transformer>) -> Self {
        Self {
            transformer,
            when: None,
        }
    }

    pub fn with_when(mut self, when: Condition) -> Self {
        self.when = Some(when);
        self
    }

    pub fn name(&self) -> &str {
        self.transformer.name()
    }
}

impl std::fmt::Debug for TransformerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerContext")
            .field("transformer", &self.transformer.name())
            .field("columns", &self.transformer.declared_columns())
            .field("when", &self.when.is_some())
            .finish()
    }
}

/// Evaluates an optional predicate; no predicate means "always".
pub fn evaluate_when(
    when: Option<&Condition>,
    record: &mut Record,
) -> Result<bool, TransformError> {
    match when {
        Some(cond) => cond(record),
        None => Ok(true),
    }
}
