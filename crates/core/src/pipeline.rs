//! Run orchestration: a bounded worker pool builds one row per session and
//! a single consumer thread performs every table append, so write order is
//! completion order and rows never interleave.

use std::sync::mpsc;
use std::thread;

use crate::error::{ReportError, Result};
use crate::report::ReportWriter;
use crate::row::{build_session_row, RowOutcome, RunContext};
use crate::store::CollectStore;

pub const DEFAULT_WORKERS: usize = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sessions: usize,
    pub cache_hits: usize,
    pub rejections: usize,
}

pub fn run(
    store: &dyn CollectStore,
    ctx: &RunContext,
    writer: ReportWriter,
    workers: usize,
) -> Result<RunSummary> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| ReportError::Worker(e.to_string()))?;
    let (tx, rx) = mpsc::channel::<Result<RowOutcome>>();

    thread::scope(|threads| {
        let consumer = threads.spawn(move || consume(rx, writer));
        pool.scope(|scope| {
            for session in store.sessions() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    // A closed channel means the consumer already failed;
                    // the error is reported from its join below.
                    let _ = tx.send(build_session_row(ctx, store, session));
                });
            }
        });
        drop(tx);
        match consumer.join() {
            Ok(result) => result,
            Err(_) => Err(ReportError::Worker("report writer thread panicked".into())),
        }
    })
}

fn consume(rx: mpsc::Receiver<Result<RowOutcome>>, mut writer: ReportWriter) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let mut failure: Option<ReportError> = None;
    for outcome in rx {
        match outcome {
            Ok(outcome) if failure.is_none() => {
                if let Err(err) = append(&mut writer, &outcome, &mut summary) {
                    failure = Some(err);
                }
            }
            Ok(_) => {}
            Err(err) => {
                if failure.is_none() {
                    failure = Some(err);
                }
            }
        }
    }
    if let Some(err) = failure {
        return Err(err);
    }
    writer.finish()?;
    Ok(summary)
}

fn append(writer: &mut ReportWriter, outcome: &RowOutcome, summary: &mut RunSummary) -> Result<()> {
    writer.append_session(&outcome.row)?;
    for rejection in &outcome.rejections {
        writer.append_rejection(rejection)?;
    }
    summary.sessions += 1;
    if outcome.cache_hit {
        summary.cache_hits += 1;
    }
    summary.rejections += outcome.rejections.len();
    Ok(())
}
