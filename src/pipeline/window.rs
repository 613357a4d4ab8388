//! Window execution.
//!
//! A window with one member runs it on the calling thread. A window with
//! several members starts one worker thread per member at init time. For
//! every row the window detaches each member's columns into a private
//! record view, sends the view over the member's single-slot job channel
//! and then collects one completion per dispatched view, attaching the
//! columns back. The row is complete when the count of outstanding views
//! drops to zero.
//!
//! Workers live until [`TransformationWindow::done`] closes their job
//! channels; each then calls its transformer's `done` and exits, and the
//! window joins all of them before returning.

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::error::TransformError;
use crate::record::Record;
use crate::transformers::{Condition, Transformer, TransformerContext, evaluate_when};

/// A window member before the window starts.
pub(crate) struct WindowMember {
    pub ctx: TransformerContext,
    /// Record indices of the declared columns.
    pub columns: Vec<usize>,
}

struct Completion {
    member: usize,
    record: Record,
    result: Result<(), TransformError>,
}

struct Worker {
    name: String,
    columns: Vec<usize>,
    when: Option<Condition>,
    jobs: Option<Sender<Record>>,
    handle: Option<JoinHandle<Result<(), TransformError>>>,
}

enum Execution {
    Inline(Box<dyn Transformer>, Option<Condition>),
    Concurrent {
        workers: Vec<Worker>,
        completions: Receiver<Completion>,
    },
    Stopped,
}

pub struct TransformationWindow {
    columns: BTreeSet<String>,
    names: Vec<String>,
    execution: Execution,
}

impl TransformationWindow {
    /// Starts a window over initialized transformers.
    ///
    /// On a worker spawn failure the workers already started are stopped
    /// and the error is returned.
    pub(crate) fn start(
        label: &str,
        mut members: Vec<WindowMember>,
        cancel: &CancelToken,
    ) -> std::io::Result<Self> {
        let names: Vec<String> = members.iter().map(|m| m.ctx.name().to_string()).collect();
        let columns: BTreeSet<String> = members
            .iter()
            .flat_map(|m| m.ctx.transformer.declared_columns().iter().cloned())
            .collect();

        if members.len() == 1
            && let Some(member) = members.pop()
        {
            debug!(window = label, transformer = %names[0], "inline window");
            return Ok(Self {
                columns,
                names,
                execution: Execution::Inline(member.ctx.transformer, member.ctx.when),
            });
        }

        let (done_tx, done_rx) = unbounded();
        let mut window = Self {
            columns,
            names,
            execution: Execution::Concurrent {
                workers: Vec::with_capacity(members.len()),
                completions: done_rx,
            },
        };

        for (idx, member) in members.into_iter().enumerate() {
            let (job_tx, job_rx) = bounded::<Record>(1);
            let name = member.ctx.name().to_string();
            let transformer = member.ctx.transformer;
            let completions = done_tx.clone();
            let cancel = cancel.clone();
            let spawned = thread::Builder::new()
                .name(format!("window-{label}-{idx}"))
                .spawn(move || run_worker(idx, transformer, job_rx, completions, cancel));
            let handle = match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    window.done();
                    return Err(e);
                }
            };
            if let Execution::Concurrent { workers, .. } = &mut window.execution {
                workers.push(Worker {
                    name,
                    columns: member.columns,
                    when: member.ctx.when,
                    jobs: Some(job_tx),
                    handle: Some(handle),
                });
            }
        }
        debug!(window = label, members = ?window.names, "concurrent window");
        Ok(window)
    }

    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    pub fn member_names(&self) -> &[String] {
        &self.names
    }

    pub fn is_concurrent(&self) -> bool {
        matches!(self.execution, Execution::Concurrent { .. })
    }

    /// Runs every member on `record` and waits for all of them.
    ///
    /// The first member error is returned after every dispatched view has
    /// been attached back, so the record is whole again on return.
    pub fn transform(
        &mut self,
        record: &mut Record,
        cancel: &CancelToken,
    ) -> Result<(), TransformError> {
        match &mut self.execution {
            Execution::Inline(transformer, when) => {
                if evaluate_when(when.as_ref(), record)? {
                    transformer.transform(record, cancel)?;
                }
                Ok(())
            }
            Execution::Concurrent { workers, completions } => {
                // Predicates see the whole row, before any member's
                // columns are detached.
                let applies = workers
                    .iter()
                    .map(|w| evaluate_when(w.when.as_ref(), record))
                    .collect::<Result<Vec<bool>, _>>()?;

                let mut first_err: Option<TransformError> = None;
                let mut pending = 0usize;

                for worker in workers.iter().zip(applies).filter_map(|(w, a)| a.then_some(w)) {
                    match dispatch(worker, record) {
                        Ok(()) => pending += 1,
                        Err(e) => {
                            first_err = Some(e);
                            break;
                        }
                    }
                }

                while pending > 0 {
                    let Ok(done) = completions.recv() else {
                        first_err.get_or_insert(TransformError::Failed {
                            transformer: "window".to_string(),
                            reason: "window workers exited".to_string(),
                        });
                        break;
                    };
                    pending -= 1;
                    trace!(transformer = %workers[done.member].name, "member finished");
                    if let Err(e) = record.attach(done.record) {
                        first_err.get_or_insert(e.into());
                    }
                    if let Err(e) = done.result {
                        first_err.get_or_insert(e);
                    }
                }

                match first_err {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
            Execution::Stopped => Err(TransformError::Failed {
                transformer: self.names.join(","),
                reason: "window is stopped".to_string(),
            }),
        }
    }

    /// Stops the window, calling `done` on every member in order. Returns
    /// every error; an empty vector means a clean shutdown.
    pub fn done(&mut self) -> Vec<TransformError> {
        let mut errors = Vec::new();
        match std::mem::replace(&mut self.execution, Execution::Stopped) {
            Execution::Inline(mut transformer, _) => {
                if let Err(e) = transformer.done() {
                    errors.push(e);
                }
            }
            Execution::Concurrent { mut workers, .. } => {
                for worker in workers.iter_mut() {
                    worker.jobs.take();
                }
                for worker in workers.iter_mut() {
                    let Some(handle) = worker.handle.take() else {
                        continue;
                    };
                    match handle.join() {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => errors.push(e),
                        Err(_) => {
                            warn!(transformer = %worker.name, "window worker panicked");
                            errors.push(TransformError::Failed {
                                transformer: worker.name.clone(),
                                reason: "worker panicked".to_string(),
                            });
                        }
                    }
                }
            }
            Execution::Stopped => {}
        }
        errors
    }
}

impl Drop for TransformationWindow {
    fn drop(&mut self) {
        for e in self.done() {
            warn!(error = %e, "transformer shutdown failed while dropping window");
        }
    }
}

/// Sends `worker` its view of `record`.
fn dispatch(worker: &Worker, record: &mut Record) -> Result<(), TransformError> {
    let jobs = worker.jobs.as_ref().ok_or_else(|| stopped(&worker.name))?;
    let view = record.detach(&worker.columns)?;
    if let Err(returned) = jobs.send(view) {
        record.attach(returned.into_inner())?;
        return Err(stopped(&worker.name));
    }
    Ok(())
}

fn stopped(name: &str) -> TransformError {
    TransformError::Failed {
        transformer: name.to_string(),
        reason: "window worker is not running".to_string(),
    }
}

fn run_worker(
    member: usize,
    mut transformer: Box<dyn Transformer>,
    jobs: Receiver<Record>,
    completions: Sender<Completion>,
    cancel: CancelToken,
) -> Result<(), TransformError> {
    while let Ok(mut record) = jobs.recv() {
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| transformer.transform(&mut record, &cancel)));
        let result = outcome.unwrap_or_else(|_| {
            Err(TransformError::Failed {
                transformer: transformer.name().to_string(),
                reason: "transformer panicked".to_string(),
            })
        });
        if completions.send(Completion { member, record, result }).is_err() {
            break;
        }
    }
    transformer.done()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{encoded, record_with};
    use crate::value::RawValue;
    use std::time::Duration;

    /// Appends a suffix to one column after an optional delay.
    struct Suffix {
        columns: Vec<String>,
        idx: usize,
        suffix: &'static str,
        delay: Duration,
    }

    impl Suffix {
        fn boxed(column: &str, idx: usize, suffix: &'static str, delay_ms: u64) -> WindowMember {
            WindowMember {
                ctx: TransformerContext::new(Box::new(Suffix {
                    columns: vec![column.to_string()],
                    idx,
                    suffix,
                    delay: Duration::from_millis(delay_ms),
                })),
                columns: vec![idx],
            }
        }
    }

    impl Transformer for Suffix {
        fn name(&self) -> &str {
            self.suffix
        }

        fn declared_columns(&self) -> &[String] {
            &self.columns
        }

        fn transform(
            &mut self,
            record: &mut Record,
            _cancel: &CancelToken,
        ) -> Result<(), TransformError> {
            thread::sleep(self.delay);
            let mut data = record.get_raw_by_idx(self.idx)?.data.clone();
            data.extend_from_slice(self.suffix.as_bytes());
            record.set_raw_by_idx(self.idx, RawValue::new(data))?;
            Ok(())
        }
    }

    struct Failing;

    impl Transformer for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn declared_columns(&self) -> &[String] {
            &[]
        }

        fn transform(
            &mut self,
            _record: &mut Record,
            _cancel: &CancelToken,
        ) -> Result<(), TransformError> {
            Err(TransformError::Failed {
                transformer: "failing".to_string(),
                reason: "boom".to_string(),
            })
        }
    }

    /// Reads a column it did not declare.
    struct Trespasser {
        columns: Vec<String>,
    }

    impl Transformer for Trespasser {
        fn name(&self) -> &str {
            "trespasser"
        }

        fn declared_columns(&self) -> &[String] {
            &self.columns
        }

        fn transform(
            &mut self,
            record: &mut Record,
            _cancel: &CancelToken,
        ) -> Result<(), TransformError> {
            record.get_raw_by_name("name")?;
            Ok(())
        }
    }

    #[test]
    fn test_inline_window() {
        let cancel = CancelToken::new();
        let mut window =
            TransformationWindow::start("t", vec![Suffix::boxed("name", 1, "-x", 0)], &cancel).unwrap();
        assert!(!window.is_concurrent());
        let mut record = record_with(b"1\tAlice\ta@b.c");
        window.transform(&mut record, &cancel).unwrap();
        assert_eq!(encoded(&record), "1\tAlice-x\ta@b.c");
        assert!(window.done().is_empty());
    }

    #[test]
    fn test_concurrent_matches_sequential() {
        let cancel = CancelToken::new();
        let mut window = TransformationWindow::start(
            "t",
            vec![
                Suffix::boxed("id", 0, "-a", 15),
                Suffix::boxed("name", 1, "-b", 0),
                Suffix::boxed("email", 2, "-c", 5),
            ],
            &cancel,
        )
        .unwrap();
        assert!(window.is_concurrent());
        assert_eq!(window.member_names(), &["-a", "-b", "-c"]);

        let mut record = record_with(b"1\tAlice\ta@b.c");
        for _ in 0..20 {
            record.set_row(b"1\tAlice\ta@b.c").unwrap();
            window.transform(&mut record, &cancel).unwrap();
            assert_eq!(encoded(&record), "1-a\tAlice-b\ta@b.c-c");
        }
        assert!(window.done().is_empty());
    }

    #[test]
    fn test_member_when_skips() {
        let cancel = CancelToken::new();
        let mut skipped = Suffix::boxed("name", 1, "-b", 0);
        skipped.ctx = skipped
            .ctx
            .with_when(Box::new(|_: &mut Record| -> Result<bool, TransformError> { Ok(false) }));
        let mut window =
            TransformationWindow::start("t", vec![Suffix::boxed("id", 0, "-a", 0), skipped], &cancel)
                .unwrap();
        let mut record = record_with(b"1\tAlice\ta@b.c");
        window.transform(&mut record, &cancel).unwrap();
        assert_eq!(encoded(&record), "1-a\tAlice\ta@b.c");
    }

    #[test]
    fn test_error_surfaces_and_record_is_whole() {
        let cancel = CancelToken::new();
        let failing = WindowMember {
            ctx: TransformerContext::new(Box::new(Failing)),
            columns: vec![2],
        };
        let mut window =
            TransformationWindow::start("t", vec![Suffix::boxed("id", 0, "-a", 5), failing], &cancel)
                .unwrap();
        let mut record = record_with(b"1\tAlice\ta@b.c");
        let err = window.transform(&mut record, &cancel).unwrap_err();
        assert!(matches!(err, TransformError::Failed { reason, .. } if reason == "boom"));
        assert_eq!(encoded(&record), "1-a\tAlice\ta@b.c");
    }

    #[test]
    fn test_undeclared_column_access_is_rejected() {
        let cancel = CancelToken::new();
        let trespasser = WindowMember {
            ctx: TransformerContext::new(Box::new(Trespasser {
                columns: vec!["email".to_string()],
            })),
            columns: vec![2],
        };
        let mut window =
            TransformationWindow::start("t", vec![Suffix::boxed("id", 0, "-a", 0), trespasser], &cancel)
                .unwrap();
        let mut record = record_with(b"1\tAlice\ta@b.c");
        let err = window.transform(&mut record, &cancel).unwrap_err();
        assert!(err.to_string().contains("not owned"));
    }

    #[test]
    fn test_done_joins_workers_and_stops() {
        let cancel = CancelToken::new();
        let mut window = TransformationWindow::start(
            "t",
            vec![Suffix::boxed("id", 0, "-a", 0), Suffix::boxed("name", 1, "-b", 0)],
            &cancel,
        )
        .unwrap();
        assert!(window.done().is_empty());
        let mut record = record_with(b"1\tAlice\ta@b.c");
        assert!(window.transform(&mut record, &cancel).is_err());
        assert!(window.done().is_empty());
    }
}
