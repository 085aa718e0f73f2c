//! Run orchestration
//!
//! A run goes through these steps:
//! - reconcile the ledger and read back every attempted id
//! - seed the work queue with unattempted ids and preload earlier failures
//!   into the retry queue
//! - spawn the normal and retry worker pools
//! - wait for the work queue to drain, then for the retry queue within a time box
//! - cancel the workers and report what the ledger now holds

use crate::config::Config;
use crate::crawler::pipeline::Pipeline;
use crate::crawler::session::{HttpSessionFactory, SessionFactory};
use crate::crawler::source::IdSource;
use crate::crawler::worker::{Worker, WorkerContext, WorkerRole};
use crate::ledger::{Ledger, LedgerStats, PersistentLedger};
use crate::queue::WorkQueue;
use crate::state::{ItemId, LocatorTemplate, WorkItem};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How a phase of the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEnd {
    /// Every queued item was acknowledged
    Drained,
    /// The phase hit its time box with items still queued
    TimedOut,
    /// Every worker of the pool exited before the queue drained
    WorkersExhausted,
    /// A stop was requested from outside
    Interrupted,
    /// There was nothing to do
    Skipped,
}

impl fmt::Display for PhaseEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Drained => "drained",
            Self::TimedOut => "timed out",
            Self::WorkersExhausted => "workers exhausted",
            Self::Interrupted => "interrupted",
            Self::Skipped => "skipped",
        };
        f.write_str(text)
    }
}

/// Summary of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,

    /// Stale failure rows removed before seeding
    pub reconciled: usize,

    /// Ids pushed onto the work queue
    pub seeded: usize,

    /// Candidate ids skipped because the ledger already holds them
    pub already_attempted: usize,

    /// Earlier failures pushed onto the retry queue at startup
    pub preloaded: usize,

    pub initial_phase: PhaseEnd,
    pub retry_phase: PhaseEnd,

    /// Ledger contents after the run
    pub ledger: LedgerStats,
}

/// Drives one run from seeding to shutdown
pub struct Coordinator {
    config: Arc<Config>,
    ledger: Arc<dyn Ledger>,
    sessions: Arc<dyn SessionFactory>,
    pipeline: Arc<Pipeline>,
    stop: CancellationToken,
}

impl Coordinator {
    /// Creates a coordinator with the CSV ledger, HTTP sessions and selector extractor
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ledger opened and pipeline built
    /// * `Err(HarvestError)` - The ledger files do not match the configured schema,
    ///   or the pipeline could not be built
    pub async fn new(config: Config) -> Result<Self, HarvestError> {
        let ledger = PersistentLedger::from_config(&config).await?;
        let sessions = HttpSessionFactory::new(&config.browser);
        let pipeline = Pipeline::from_config(&config)?;
        Ok(Self::with_components(
            config,
            Arc::new(ledger),
            Arc::new(sessions),
            pipeline,
        ))
    }

    /// Creates a coordinator from already-built components
    pub fn with_components(
        config: Config,
        ledger: Arc<dyn Ledger>,
        sessions: Arc<dyn SessionFactory>,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            config: Arc::new(config),
            ledger,
            sessions,
            pipeline: Arc::new(pipeline),
            stop: CancellationToken::new(),
        }
    }

    /// Token that stops a run in progress when cancelled
    ///
    /// Workers finish the item in hand, the run winds down as on a normal
    /// shutdown, and every unfinished id stays eligible for the next run.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Executes a run over the ids named by `source`
    pub async fn run(&self, source: IdSource) -> Result<RunReport, HarvestError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let workers = &self.config.workers;

        let reconciled = self.ledger.reconcile().await?;
        if reconciled > 0 {
            tracing::info!("Removed {} failure rows already present in the success store", reconciled);
        }

        let template = LocatorTemplate::new(&self.config.run.locator_template);
        let work = Arc::new(WorkQueue::new("work"));
        let retry = Arc::new(WorkQueue::new("retry"));

        let candidates = source.resolve(&self.config).await?;
        let attempted = self.ledger.load_attempted_ids().await?;
        let already_attempted = candidates.iter().filter(|id| attempted.contains(*id)).count();
        let seeded = enqueue(
            &work,
            candidates.into_iter().filter(|id| !attempted.contains(id)),
            &template,
        );

        let preloaded = if workers.preload_failures || source.is_failures_only() {
            enqueue(&retry, self.ledger.load_failures().await?, &template)
        } else {
            0
        };

        tracing::info!(
            "Queued {} new ids ({} already attempted), {} earlier failures to retry",
            seeded,
            already_attempted,
            preloaded
        );

        let mut report = RunReport {
            started_at,
            elapsed: Duration::ZERO,
            reconciled,
            seeded,
            already_attempted,
            preloaded,
            initial_phase: PhaseEnd::Skipped,
            retry_phase: PhaseEnd::Skipped,
            ledger: LedgerStats::default(),
        };

        if seeded == 0 && preloaded == 0 {
            tracing::info!("Nothing to do");
            report.ledger = self.ledger.stats().await?;
            report.elapsed = start.elapsed();
            return Ok(report);
        }

        let cancel = self.stop.child_token();
        let ctx = Arc::new(WorkerContext {
            ledger: Arc::clone(&self.ledger),
            pipeline: Arc::clone(&self.pipeline),
            sessions: Arc::clone(&self.sessions),
            work: Arc::clone(&work),
            retry: Arc::clone(&retry),
            retry_backoff: workers.retry_backoff(),
            session_timeout: self.config.timeouts.session(),
            cancel: cancel.clone(),
        });

        let mut normal_pool = spawn_pool(WorkerRole::Normal, workers.normal, &ctx);
        let mut retry_pool = spawn_pool(WorkerRole::Retry, workers.retry, &ctx);
        tracing::info!(
            "Started {} normal and {} retry workers",
            workers.normal,
            workers.retry
        );

        // A stop also ends the workers, so it is checked first
        report.initial_phase = tokio::select! {
            biased;
            _ = self.stop.cancelled() => PhaseEnd::Interrupted,
            _ = work.join() => PhaseEnd::Drained,
            _ = wait_exhausted(&mut normal_pool) => PhaseEnd::WorkersExhausted,
        };
        tracing::info!("Initial phase {}", report.initial_phase);

        report.retry_phase = if report.initial_phase == PhaseEnd::Interrupted {
            PhaseEnd::Interrupted
        } else {
            let limit = workers.retry_phase_timeout();
            let phase = async {
                tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => PhaseEnd::Interrupted,
                    _ = retry.join() => PhaseEnd::Drained,
                    _ = wait_exhausted(&mut retry_pool) => PhaseEnd::WorkersExhausted,
                }
            };
            match tokio::time::timeout(limit, phase).await {
                Ok(end) => end,
                Err(_) => {
                    tracing::warn!(
                        "Retry phase timed out after {:?} with {} items unresolved",
                        limit,
                        retry.unfinished()
                    );
                    PhaseEnd::TimedOut
                }
            }
        };
        tracing::info!("Retry phase {}", report.retry_phase);

        cancel.cancel();
        wait_exhausted(&mut normal_pool).await;
        wait_exhausted(&mut retry_pool).await;
        tracing::debug!("All workers stopped");

        report.ledger = self.ledger.stats().await?;
        report.elapsed = start.elapsed();
        tracing::info!(
            "Run finished in {:?}: {} succeeded, {} unresolved",
            report.elapsed,
            report.ledger.succeeded,
            report.ledger.failed
        );
        Ok(report)
    }
}

fn enqueue(
    queue: &WorkQueue<WorkItem>,
    ids: impl IntoIterator<Item = ItemId>,
    template: &LocatorTemplate,
) -> usize {
    let mut seen = HashSet::new();
    let mut pushed = 0;
    for id in ids {
        if !seen.insert(id.clone()) {
            continue;
        }
        match WorkItem::new(id, template) {
            Ok(item) => {
                queue.push(item);
                pushed += 1;
            }
            Err(e) => tracing::warn!("Skipping id for {} queue: {}", queue.name(), e),
        }
    }
    pushed
}

fn spawn_pool(role: WorkerRole, size: u32, ctx: &Arc<WorkerContext>) -> JoinSet<()> {
    let mut pool = JoinSet::new();
    for index in 0..size as usize {
        pool.spawn(Worker::new(role, index, Arc::clone(ctx)).run());
    }
    pool
}

/// Resolves once every task of the pool has exited
///
/// Cancel safe: dropping it part way leaves the remaining tasks in the pool.
async fn wait_exhausted(pool: &mut JoinSet<()>) {
    while let Some(result) = pool.join_next().await {
        if let Err(e) = result {
            tracing::error!("Worker task ended abnormally: {}", e);
        }
    }
}
