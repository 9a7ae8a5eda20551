use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Local;
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, error, info};

use crate::backlog::{self, BacklogEntry};
use crate::config::HarvestConfig;
use crate::dedup::SeenUrls;
use crate::fetch::{harvest_range_into, FetchPlan, RangeStats};
use crate::monitor::Monitor;
use crate::range::IndexRange;
use crate::record::Record;
use crate::{info_time, Result};

/// Builds the one monitor a worker keeps for its lifetime.
pub trait MonitorFactory: Send + Sync + 'static {
    fn build(&self) -> Result<Arc<dyn Monitor>>;
}

impl<F> MonitorFactory for F
where
    F: Fn() -> Result<Arc<dyn Monitor>> + Send + Sync + 'static,
{
    fn build(&self) -> Result<Arc<dyn Monitor>> {
        self()
    }
}

/// Run state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    LoadingBacklog,
    Dispatching,
    AwaitingWorkers,
    Merging,
    Writing,
    Done,
    Failed,
}

/// One unit of dispatched work.
#[derive(Debug, Clone)]
struct RangeTask {
    /// Position in the range specification; keeps the merge order deterministic.
    index: usize,
    requested: IndexRange,
    span: IndexRange,
    label: String,
}

/// What a worker reports back for one range.
///
/// A failed range still carries the records it claimed before failing; their
/// URLs are taken in the shared seen-set, so no sibling range will keep them.
#[derive(Debug)]
pub enum RangeOutcome {
    Done {
        index: usize,
        range: IndexRange,
        records: Vec<Record>,
        stats: RangeStats,
    },
    Failed {
        index: usize,
        range: IndexRange,
        reason: String,
        records: Vec<Record>,
    },
}

impl RangeOutcome {
    fn index(&self) -> usize {
        match self {
            RangeOutcome::Done { index, .. } | RangeOutcome::Failed { index, .. } => *index,
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestReport {
    pub ranges_total: usize,
    pub ranges_failed: usize,
    pub pages_skipped: u64,
    pub duplicates: u64,
    pub new_entries: usize,
    pub total_entries: usize,
    pub output: PathBuf,
}

struct Run {
    phase: Phase,
}

impl Run {
    fn enter(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "harvest phase");
        self.phase = phase;
    }
}

/// Harvests every configured range and merges the result into the backlog.
///
/// Individual ranges may fail without failing the run; only a failed backlog
/// write is an error.
pub async fn process_site<F: MonitorFactory>(
    config: &HarvestConfig,
    factory: F,
) -> Result<HarvestReport> {
    let start_time = Local::now();
    let mut run = Run { phase: Phase::Init };

    run.enter(Phase::LoadingBacklog);
    let existing = backlog::load(&config.output).await;
    let seen = Arc::new(SeenUrls::seeded(existing.urls()));
    let tag = existing.tag_or(&config.tag).to_string();

    run.enter(Phase::Dispatching);
    let tasks: VecDeque<RangeTask> = config
        .ranges
        .iter()
        .enumerate()
        .map(|(index, &requested)| RangeTask {
            index,
            requested,
            span: config.unit.span(requested, config.plan.page_size),
            label: config.unit.label(requested),
        })
        .collect();
    let ranges_total = tasks.len();
    let worker_count = config.threads.min(ranges_total);
    info_time!(
        "Dispatching {} range(s) to {} worker(s)",
        ranges_total,
        worker_count
    );

    let queue = Arc::new(Mutex::new(tasks));
    let plan = Arc::new(config.plan.clone());
    let factory = Arc::new(factory);

    let (outcome_tx, outcome_rx) = mpsc::channel(256);
    let collect_handle = tokio::spawn(async move { collect_outcomes(outcome_rx).await });

    let mut workers = JoinSet::new();
    for worker_id in 0..worker_count {
        workers.spawn(run_worker(
            worker_id,
            Arc::clone(&factory),
            Arc::clone(&queue),
            Arc::clone(&plan),
            Arc::clone(&seen),
            outcome_tx.clone(),
        ));
    }
    drop(outcome_tx);

    run.enter(Phase::AwaitingWorkers);
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "worker stopped"),
            Err(e) => error!(error = %e, "worker task failed"),
        }
    }
    let mut outcomes = collect_handle.await?;

    // Ranges no worker got to, e.g. because every monitor failed to build.
    let leftover: Vec<RangeTask> = lock_queue(&queue).drain(..).collect();
    for task in leftover {
        error!(range = %task.requested, "range was never processed");
        outcomes.push(RangeOutcome::Failed {
            index: task.index,
            range: task.requested,
            reason: "no worker available".to_string(),
            records: Vec::new(),
        });
    }

    run.enter(Phase::Merging);
    outcomes.sort_by_key(RangeOutcome::index);

    let mut ranges_failed = 0;
    let mut pages_skipped = 0;
    let mut duplicates = 0;
    let mut new_entries = Vec::new();
    for outcome in outcomes {
        let records = match outcome {
            RangeOutcome::Done { records, stats, .. } => {
                pages_skipped += stats.pages_skipped;
                duplicates += stats.duplicates;
                records
            }
            RangeOutcome::Failed { records, .. } => {
                ranges_failed += 1;
                records
            }
        };
        new_entries.extend(
            records
                .into_iter()
                .map(|record| BacklogEntry::new(tag.clone(), record)),
        );
    }
    let new_count = new_entries.len();
    info!(new_entries = new_count, "collected new entries from workers");

    let merged = backlog::merge(existing.entries, new_entries);
    let text = backlog::render(&merged, &config.label);

    run.enter(Phase::Writing);
    if let Err(e) = backlog::write_atomic(&config.output, &text).await {
        run.enter(Phase::Failed);
        error!(path = %config.output.display(), error = %e, "couldn't write backlog");
        return Err(e);
    }

    run.enter(Phase::Done);
    let report = HarvestReport {
        ranges_total,
        ranges_failed,
        pages_skipped,
        duplicates,
        new_entries: new_count,
        total_entries: merged.len(),
        output: config.output.clone(),
    };
    info_time!(
        start_time,
        "Processed {} range(s) ({} failed), added {} new entries, backlog now holds {} entries in {}",
        report.ranges_total - report.ranges_failed,
        report.ranges_failed,
        report.new_entries,
        report.total_entries,
        report.output.display()
    );
    Ok(report)
}

/// Pulls ranges off the shared queue until it is empty, using one monitor throughout.
async fn run_worker<F: MonitorFactory>(
    worker_id: usize,
    factory: Arc<F>,
    queue: Arc<Mutex<VecDeque<RangeTask>>>,
    plan: Arc<FetchPlan>,
    seen: Arc<SeenUrls>,
    outcome_tx: mpsc::Sender<RangeOutcome>,
) -> Result<()> {
    let monitor = factory.build()?;
    debug!(worker_id, monitor = monitor.name(), "worker started");

    loop {
        let next = lock_queue(&queue).pop_front();
        let Some(task) = next else {
            break;
        };

        // Each range runs in its own task so a panic is contained to that range.
        // Records flow out through the channel as they are claimed, so the ones
        // gathered before a panic are kept.
        let (records_tx, mut records_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            let plan = Arc::clone(&plan);
            let seen = Arc::clone(&seen);
            let task = task.clone();
            async move {
                harvest_range_into(&*monitor, task.span, &plan, &seen, &task.label, &records_tx)
                    .await
            }
        });

        let joined = handle.await;
        let mut records = Vec::new();
        while let Some(record) = records_rx.recv().await {
            records.push(record);
        }

        let outcome = match joined {
            Ok(stats) => RangeOutcome::Done {
                index: task.index,
                range: task.requested,
                records,
                stats,
            },
            Err(e) => {
                error!(
                    worker_id,
                    range = %task.requested,
                    kept = records.len(),
                    error = %e,
                    "range failed"
                );
                RangeOutcome::Failed {
                    index: task.index,
                    range: task.requested,
                    reason: e.to_string(),
                    records,
                }
            }
        };
        outcome_tx.send(outcome).await?;
    }

    debug!(worker_id, "worker finished");
    Ok(())
}

/// Uses a `mpsc` Receiver to collect every range outcome into a single `Vec`.
async fn collect_outcomes(mut outcome_rx: mpsc::Receiver<RangeOutcome>) -> Vec<RangeOutcome> {
    let mut col = Vec::new();
    while let Some(outcome) = outcome_rx.recv().await {
        match &outcome {
            RangeOutcome::Done { range, records, .. } => {
                debug!(%range, records = records.len(), "received range outcome")
            }
            RangeOutcome::Failed { range, reason, .. } => {
                debug!(%range, reason = %reason, "received failed range outcome")
            }
        }
        col.push(outcome);
    }
    col
}

fn lock_queue(
    queue: &Mutex<VecDeque<RangeTask>>,
) -> std::sync::MutexGuard<'_, VecDeque<RangeTask>> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
