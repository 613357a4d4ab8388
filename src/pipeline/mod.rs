//! Table pipelines.
//!
//! The ordered transformer list of a table is cut into windows. Windows run
//! one after another; the members of one window declare pairwise disjoint
//! columns and run concurrently on the same row. A transformer listed after
//! another one therefore always sees that transformer's output unless the
//! two touch disjoint columns, in which case order does not matter.
//!
//! ```text
//! [A(id)] [B(name)] [C(id)] [D()] [E(email)]
//!  \_____ window 0 _/ \_1_/  \2/   \_ 3 _/
//! ```

pub mod table_pipeline;
pub mod window;

use std::collections::HashSet;

use crate::validation::{Severity, ValidationWarning, ValidationWarnings};

pub use table_pipeline::{PipelineStats, TransformationPipeline};
pub use window::TransformationWindow;

/// Groups transformers into windows, given each one's declared columns in
/// configuration order. Returns the transformer indices of every window.
///
/// A transformer with no declared columns gets a window of its own. Any
/// other transformer joins the current window if its columns are disjoint
/// from those already in it, and starts a new window otherwise.
pub fn plan_windows<S: AsRef<str>>(declared: &[Vec<S>]) -> Vec<Vec<usize>> {
    let mut windows = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut taken: HashSet<&str> = HashSet::new();

    for (i, columns) in declared.iter().enumerate() {
        if columns.is_empty() {
            if !current.is_empty() {
                windows.push(std::mem::take(&mut current));
                taken.clear();
            }
            windows.push(vec![i]);
            continue;
        }
        if columns.iter().any(|c| taken.contains(c.as_ref())) {
            windows.push(std::mem::take(&mut current));
            taken.clear();
        }
        current.push(i);
        taken.extend(columns.iter().map(|c| c.as_ref()));
    }
    if !current.is_empty() {
        windows.push(current);
    }
    windows
}

/// Column footprint of one transformer, used by [`check_ordering`].
#[derive(Debug, Clone, Default)]
pub struct Footprint {
    pub name: String,
    pub reads: Vec<String>,
    pub writes: Vec<String>,
}

/// Flags transformers that read a column which only later transformers
/// write. Such a transformer sees the original value, which is usually a
/// configuration mistake, so each case is reported as a warning.
pub fn check_ordering(footprints: &[Footprint]) -> ValidationWarnings {
    let mut warnings = ValidationWarnings::new();
    for (pos, reader) in footprints.iter().enumerate() {
        for column in &reader.reads {
            if reader.writes.contains(column) {
                continue;
            }
            let written_before = footprints[..pos].iter().any(|f| f.writes.contains(column));
            if written_before {
                continue;
            }
            let later = footprints[pos + 1..]
                .iter()
                .enumerate()
                .find(|(_, f)| f.writes.contains(column));
            if let Some((offset, writer)) = later {
                warnings.push(
                    ValidationWarning::new()
                        .with_severity(Severity::Warning)
                        .with_msg("transformer reads a column that is written only by a later transformer")
                        .add_meta("TransformerName", reader.name.as_str())
                        .add_meta("TransformerPosition", pos)
                        .add_meta("ColumnName", column.as_str())
                        .add_meta("WriterName", writer.name.as_str())
                        .add_meta("WriterPosition", pos + 1 + offset),
                );
            }
        }
    }
    warnings
}
