//! Batch aggregation: bounded fan-out of fetch → upsert pipelines raced
//! against a deadline.
//!
//! Each batch owns an [`OnlineSet`]. Pipelines are admitted through a
//! semaphore with `queue_capacity` permits, so at most that many identifiers
//! are in flight. The orchestrator runs in its own task; the caller waits on
//! it for at most `deadline` and then reads whatever the set holds. What
//! happens to pipelines still running at that point, or when the caller
//! stops waiting early, is decided by [`OverrunPolicy`].

use std::{
    collections::{BTreeSet, HashSet},
    fmt,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::{Mutex, Semaphore},
    task::{JoinHandle, JoinSet},
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{
    models::StatusRecord,
    status::StatusSource,
    upsert::UpsertEngine,
};

/// What to do with in-flight pipelines once the deadline has fired or the
/// caller has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrunPolicy {
    /// Leave them running; they keep writing the store and the orphaned set.
    #[default]
    Detach,
    /// Abort the orchestrator and every pipeline it spawned.
    Cancel,
}

/// Owns the orchestrator task for one `resolve` call. Under
/// [`OverrunPolicy::Cancel`] dropping it aborts the batch, which covers a
/// caller that disconnects before the deadline.
struct Orchestrator {
    handle: JoinHandle<OutcomeTally>,
    policy: OverrunPolicy,
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if self.policy == OverrunPolicy::Cancel {
            self.handle.abort();
        }
    }
}

impl FromStr for OverrunPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "detach" | "background" => Ok(Self::Detach),
            "cancel" | "abort" => Ok(Self::Cancel),
            other => Err(format!(
                "unknown overrun policy '{other}', expected one of: detach, cancel"
            )),
        }
    }
}

impl fmt::Display for OverrunPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detach => f.write_str("detach"),
            Self::Cancel => f.write_str("cancel"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    pub queue_capacity: usize,
    pub deadline: Duration,
    pub overrun: OverrunPolicy,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 200,
            deadline: Duration::from_secs(2),
            overrun: OverrunPolicy::Detach,
        }
    }
}

/// External identifiers confirmed online during one batch.
#[derive(Debug, Clone, Default)]
pub struct OnlineSet {
    inner: Arc<Mutex<BTreeSet<i64>>>,
}

impl OnlineSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, external_id: i64) -> bool {
        self.inner.lock().await.insert(external_id)
    }

    pub async fn snapshot(&self) -> Vec<i64> {
        self.inner.lock().await.iter().copied().collect()
    }
}

/// Terminal state of one identifier's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Online,
    Offline,
    FetchFailed,
    UpsertAborted,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeTally {
    pub online: usize,
    pub offline: usize,
    pub fetch_failed: usize,
    pub upsert_aborted: usize,
    pub panicked: usize,
}

impl OutcomeTally {
    fn record(&mut self, outcome: PipelineOutcome) {
        match outcome {
            PipelineOutcome::Online => self.online += 1,
            PipelineOutcome::Offline => self.offline += 1,
            PipelineOutcome::FetchFailed => self.fetch_failed += 1,
            PipelineOutcome::UpsertAborted => self.upsert_aborted += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.online + self.offline + self.fetch_failed + self.upsert_aborted + self.panicked
    }
}

/// Result handed back to the caller of [`Aggregator::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Sorted, duplicate free.
    pub online: Vec<i64>,
    /// `false` when the deadline fired first and `online` may be partial.
    pub completed: bool,
}

#[derive(Clone)]
pub struct Aggregator {
    source: Arc<dyn StatusSource>,
    engine: UpsertEngine,
    settings: AggregatorSettings,
}

impl Aggregator {
    pub fn new(
        source: Arc<dyn StatusSource>,
        engine: UpsertEngine,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            source,
            engine,
            settings,
        }
    }

    /// Resolves a batch within the configured deadline.
    pub async fn resolve(&self, external_ids: Vec<i64>) -> BatchReport {
        let batch = normalize_batch(external_ids);
        let online = OnlineSet::new();
        let batch_size = batch.len();

        let mut orchestrator = Orchestrator {
            handle: tokio::spawn(run_batch(
                self.source.clone(),
                self.engine.clone(),
                batch,
                self.settings.queue_capacity,
                online.clone(),
            )),
            policy: self.settings.overrun,
        };

        let completed = match timeout(self.settings.deadline, &mut orchestrator.handle).await {
            Ok(Ok(tally)) => {
                debug!(
                    batch_size,
                    online = tally.online,
                    offline = tally.offline,
                    fetch_failed = tally.fetch_failed,
                    upsert_aborted = tally.upsert_aborted,
                    panicked = tally.panicked,
                    "batch completed"
                );
                true
            }
            Ok(Err(err)) => {
                warn!(batch_size, error = %err, "batch orchestrator failed");
                false
            }
            Err(_) => {
                match self.settings.overrun {
                    OverrunPolicy::Detach => info!(
                        batch_size,
                        deadline_ms = self.settings.deadline.as_millis() as u64,
                        "batch deadline reached, remaining pipelines continue in background"
                    ),
                    OverrunPolicy::Cancel => {
                        orchestrator.handle.abort();
                        info!(
                            batch_size,
                            deadline_ms = self.settings.deadline.as_millis() as u64,
                            "batch deadline reached, remaining pipelines cancelled"
                        );
                    }
                }
                false
            }
        };

        BatchReport {
            online: online.snapshot().await,
            completed,
        }
    }
}

/// Drops non-positive identifiers and repeats, keeping first-seen order.
pub fn normalize_batch(external_ids: Vec<i64>) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(external_ids.len());
    external_ids
        .into_iter()
        .filter(|&external_id| {
            if external_id <= 0 {
                warn!(external_id, "dropping non-positive identifier");
                return false;
            }
            seen.insert(external_id)
        })
        .collect()
}

/// Dispatches every identifier once a slot frees up, then waits for all of
/// them. Dropping this future aborts the pipelines it spawned.
pub async fn run_batch(
    source: Arc<dyn StatusSource>,
    engine: UpsertEngine,
    batch: Vec<i64>,
    queue_capacity: usize,
    online: OnlineSet,
) -> OutcomeTally {
    let slots = Arc::new(Semaphore::new(queue_capacity.max(1)));
    let mut pipelines = JoinSet::new();

    for external_id in batch {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };

        let source = source.clone();
        let engine = engine.clone();
        let online = online.clone();
        pipelines.spawn(async move {
            let outcome = run_pipeline(source.as_ref(), &engine, external_id, &online).await;
            drop(permit);
            outcome
        });
    }

    let mut tally = OutcomeTally::default();
    while let Some(joined) = pipelines.join_next().await {
        match joined {
            Ok(outcome) => tally.record(outcome),
            Err(err) => {
                warn!(error = %err, "pipeline task failed");
                tally.panicked += 1;
            }
        }
    }
    tally
}

/// Fetch, then upsert, then record. Failures stop here and never reach
/// other identifiers.
pub async fn run_pipeline(
    source: &dyn StatusSource,
    engine: &UpsertEngine,
    external_id: i64,
    online: &OnlineSet,
) -> PipelineOutcome {
    let record: StatusRecord = match source.fetch(external_id).await {
        Ok(record) => record,
        Err(err) => {
            if err.is_soft_fetch_failure() {
                warn!(external_id, error = %err, "status fetch failed, dropping identifier");
            } else {
                error!(external_id, error = %err, "status source misbehaved, dropping identifier");
            }
            return PipelineOutcome::FetchFailed;
        }
    };

    let outcome = match engine.add_or_update(record).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(external_id, error = %err, "upsert aborted");
            return PipelineOutcome::UpsertAborted;
        }
    };

    if outcome.online {
        online.insert(outcome.external_id).await;
        PipelineOutcome::Online
    } else {
        PipelineOutcome::Offline
    }
}
