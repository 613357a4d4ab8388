//! The per-table row loop.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{PipelineError, RowContext, TransformError};
use crate::pgcopy::{TERMINATOR, trim_newline};
use crate::record::Record;
use crate::table::TableDriver;
use crate::transformers::{Condition, TransformerContext, evaluate_when};
use crate::validation::ValidationWarnings;

use super::window::{TransformationWindow, WindowMember};
use super::{Footprint, check_ordering, plan_windows};

/// Counters reported by [`TransformationPipeline::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Data rows read (the terminator is not counted).
    pub rows: u64,
    /// Rows passed through unchanged because the table predicate was false.
    pub skipped: u64,
}

enum Stage {
    Pending(Vec<TransformerContext>),
    Running(Vec<TransformationWindow>),
    Finished,
}

/// Runs every row of one table through its transformer windows.
///
/// Lifecycle: [`new`](Self::new) plans the windows, [`init`](Self::init)
/// initializes transformers and starts window workers, rows are processed
/// with [`transform_line`](Self::transform_line) or [`run`](Self::run), and
/// [`done`](Self::done) shuts everything down. Dropping a pipeline that was
/// not finished calls `done` and logs any failure.
pub struct TransformationPipeline {
    driver: Arc<TableDriver>,
    record: Record,
    when: Option<Condition>,
    plan: Vec<Vec<usize>>,
    ordering: ValidationWarnings,
    stage: Stage,
    cancel: CancelToken,
    line: u64,
    stats: PipelineStats,
}

impl TransformationPipeline {
    pub fn new(
        driver: Arc<TableDriver>,
        transformers: Vec<TransformerContext>,
        cancel: CancelToken,
    ) -> Self {
        let declared: Vec<Vec<String>> = transformers
            .iter()
            .map(|t| t.transformer.declared_columns().to_vec())
            .collect();
        let plan = plan_windows(&declared);

        let footprints: Vec<Footprint> = transformers
            .iter()
            .filter(|t| !t.transformer.declared_columns().is_empty())
            .map(|t| Footprint {
                name: t.name().to_string(),
                reads: t.transformer.read_columns(),
                writes: t.transformer.written_columns(),
            })
            .collect();
        let ordering = check_ordering(&footprints);

        Self {
            record: Record::new(Arc::clone(&driver)),
            driver,
            when: None,
            plan,
            ordering,
            stage: Stage::Pending(transformers),
            cancel,
            line: 0,
            stats: PipelineStats::default(),
        }
    }

    /// Sets the table-level predicate. Rows for which it is false are
    /// written unchanged.
    pub fn with_when(mut self, when: Condition) -> Self {
        self.when = Some(when);
        self
    }

    /// Transformer indices of each window.
    pub fn window_plan(&self) -> &[Vec<usize>] {
        &self.plan
    }

    /// Ordering hazards found in the transformer list.
    pub fn ordering_warnings(&self) -> &ValidationWarnings {
        &self.ordering
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    fn label(&self) -> String {
        self.driver.table().to_string()
    }

    /// Initializes transformers in order and starts the windows.
    ///
    /// If a transformer fails, `done` is called on the ones initialized
    /// before it and the pipeline becomes unusable.
    pub fn init(&mut self) -> Result<(), PipelineError> {
        let mut contexts = match std::mem::replace(&mut self.stage, Stage::Finished) {
            Stage::Pending(contexts) => contexts,
            other => {
                self.stage = other;
                return Ok(());
            }
        };

        for pos in 0..contexts.len() {
            if let Err(source) = contexts[pos].transformer.init(&self.cancel) {
                for prev in contexts[..pos].iter_mut().rev() {
                    if let Err(e) = prev.transformer.done() {
                        warn!(transformer = prev.name(), error = %e, "rollback after failed init");
                    }
                }
                if source.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                return Err(PipelineError::Init {
                    transformer: contexts[pos].name().to_string(),
                    position: pos,
                    source,
                });
            }
        }

        let mut slots: Vec<Option<TransformerContext>> = contexts.drain(..).map(Some).collect();
        let mut windows = Vec::with_capacity(self.plan.len());
        for (w, members) in self.plan.iter().enumerate() {
            let mut window_members = Vec::with_capacity(members.len());
            for &idx in members {
                let Some(ctx) = slots[idx].take() else {
                    continue;
                };
                let columns = ctx
                    .transformer
                    .declared_columns()
                    .iter()
                    .filter_map(|c| self.driver.index_of(c))
                    .collect();
                window_members.push(WindowMember { ctx, columns });
            }
            let label = format!("{}-{w}", self.driver.table().name);
            match TransformationWindow::start(&label, window_members, &self.cancel) {
                Ok(window) => windows.push(window),
                Err(e) => {
                    for mut window in windows {
                        for err in window.done() {
                            warn!(error = %err, "rollback after failed window start");
                        }
                    }
                    for mut ctx in slots.into_iter().flatten() {
                        if let Err(err) = ctx.transformer.done() {
                            warn!(
                                transformer = ctx.name(),
                                error = %err,
                                "rollback after failed window start"
                            );
                        }
                    }
                    return Err(PipelineError::Worker(e));
                }
            }
        }

        info!(
            table = %self.label(),
            windows = windows.len(),
            concurrent = windows.iter().filter(|w| w.is_concurrent()).count(),
            "pipeline started"
        );
        self.stage = Stage::Running(windows);
        Ok(())
    }

    fn context(&self) -> RowContext {
        RowContext {
            schema: self.driver.table().schema.clone(),
            table: self.driver.table().name.clone(),
            line: self.line,
        }
    }

    fn row_error(&self, source: TransformError) -> PipelineError {
        if source.is_cancelled() {
            return PipelineError::Cancelled;
        }
        PipelineError::Transform {
            context: self.context(),
            source,
        }
    }

    /// Transforms one COPY line (without its newline) and appends the
    /// encoded result to `out`.
    pub fn transform_line(&mut self, line: &[u8], out: &mut Vec<u8>) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.line += 1;
        self.stats.rows += 1;

        if let Err(source) = self.record.set_row(line) {
            return Err(PipelineError::Decode {
                context: self.context(),
                source,
            });
        }

        let applies = match evaluate_when(self.when.as_ref(), &mut self.record) {
            Ok(applies) => applies,
            Err(e) => return Err(self.row_error(e)),
        };

        if applies {
            let Stage::Running(windows) = &mut self.stage else {
                return Err(self.row_error(TransformError::Failed {
                    transformer: "pipeline".to_string(),
                    reason: "pipeline is not running".to_string(),
                }));
            };
            for window in windows.iter_mut() {
                if let Err(e) = window.transform(&mut self.record, &self.cancel) {
                    return Err(self.row_error(e));
                }
            }
        } else {
            self.stats.skipped += 1;
        }

        self.record.encode_into(out).map_err(|source| PipelineError::Encode {
            context: self.context(),
            source,
        })
    }

    /// Streams a table: reads lines from `reader`, transforms them and
    /// writes them to `writer`. The terminator line and anything after it
    /// are copied unchanged.
    pub fn run<R: BufRead, W: Write>(
        &mut self,
        mut reader: R,
        mut writer: W,
    ) -> Result<PipelineStats, PipelineError> {
        let mut line = Vec::new();
        let mut out = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let body = trim_newline(&line);
            if body == TERMINATOR {
                writer.write_all(&line)?;
                io::copy(&mut reader, &mut writer)?;
                debug!(table = %self.label(), line = self.line, "end of data marker");
                break;
            }
            out.clear();
            self.transform_line(body, &mut out)?;
            out.push(b'\n');
            writer.write_all(&out)?;
        }
        writer.flush()?;
        Ok(self.stats)
    }

    /// Stops all windows and calls `done` on every transformer, returning
    /// every failure at once.
    pub fn done(&mut self) -> Result<(), PipelineError> {
        let mut errors = Vec::new();
        match std::mem::replace(&mut self.stage, Stage::Finished) {
            Stage::Running(mut windows) => {
                for window in windows.iter_mut() {
                    errors.extend(window.done());
                }
            }
            Stage::Pending(_) | Stage::Finished => {}
        }
        info!(
            table = %self.label(),
            rows = self.stats.rows,
            skipped = self.stats.skipped,
            "pipeline finished"
        );
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Done(errors))
        }
    }
}

impl Drop for TransformationPipeline {
    fn drop(&mut self) {
        if let Stage::Running(_) = self.stage
            && let Err(e) = self.done()
        {
            warn!(error = %e, "pipeline shutdown failed while dropping");
        }
    }
}
