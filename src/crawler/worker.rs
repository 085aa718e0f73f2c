//! Worker tasks draining the work and retry queues

use crate::crawler::pipeline::Pipeline;
use crate::crawler::session::{PageSession, SessionFactory};
use crate::ledger::Ledger;
use crate::queue::WorkQueue;
use crate::state::{FailureReason, Outcome, Record, WorkItem};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Which queue a worker drains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    /// Drains the work queue; failures are recorded and handed to the retry queue
    Normal,
    /// Drains the retry queue; failures go back on it after a backoff
    Retry,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

/// State shared by every worker of a run
pub(crate) struct WorkerContext {
    pub ledger: Arc<dyn Ledger>,
    pub pipeline: Arc<Pipeline>,
    pub sessions: Arc<dyn SessionFactory>,
    pub work: Arc<WorkQueue<WorkItem>>,
    pub retry: Arc<WorkQueue<WorkItem>>,
    pub retry_backoff: Duration,
    /// Bound on opening and on closing a page session
    pub session_timeout: Duration,
    pub cancel: CancellationToken,
}

pub(crate) struct Worker {
    name: String,
    role: WorkerRole,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    pub fn new(role: WorkerRole, index: usize, ctx: Arc<WorkerContext>) -> Self {
        Self {
            name: format!("{}-{}", role, index),
            role,
            ctx,
        }
    }

    /// Processes items until cancelled
    ///
    /// A worker that cannot open its page session in time exits at once; the
    /// coordinator notices when a whole pool is gone.
    pub async fn run(self) {
        let mut session = match self.open_session().await {
            Some(session) => session,
            None => return,
        };
        tracing::debug!(worker = %self.name, "Worker started");

        let queue = match self.role {
            WorkerRole::Normal => &self.ctx.work,
            WorkerRole::Retry => &self.ctx.retry,
        };

        loop {
            let lease = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => break,
                lease = queue.pop() => lease,
            };

            let item = lease.item().clone();
            match self.role {
                WorkerRole::Normal => self.process_fresh(session.as_mut(), &item).await,
                WorkerRole::Retry => self.process_retry(session.as_mut(), &item).await,
            }
            lease.ack();
        }

        if tokio::time::timeout(self.ctx.session_timeout, session.close())
            .await
            .is_err()
        {
            tracing::warn!(
                worker = %self.name,
                "Page session did not close within {:?}",
                self.ctx.session_timeout
            );
        }
        tracing::debug!(worker = %self.name, "Worker stopped");
    }

    async fn open_session(&self) -> Option<Box<dyn PageSession>> {
        let limit = self.ctx.session_timeout;
        let opened = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => {
                tracing::debug!(worker = %self.name, "Cancelled while opening page session");
                return None;
            }
            opened = tokio::time::timeout(limit, self.ctx.sessions.open()) => opened,
        };

        match opened {
            Ok(Ok(session)) => Some(session),
            Ok(Err(e)) => {
                tracing::error!(worker = %self.name, "Could not open page session: {}", e);
                None
            }
            Err(_) => {
                tracing::error!(
                    worker = %self.name,
                    "Page session did not open within {:?}",
                    limit
                );
                None
            }
        }
    }

    /// First attempt at an item from the work queue
    async fn process_fresh(&self, session: &mut dyn PageSession, item: &WorkItem) {
        let reason = match self.ctx.pipeline.process(session, item).await {
            Outcome::Success(record) => match self.persist(item, &record).await {
                Ok(()) => {
                    tracing::info!(worker = %self.name, item = %item, "Saved record");
                    return;
                }
                Err(reason) => reason,
            },
            Outcome::Failure(reason) => reason,
        };

        tracing::warn!(worker = %self.name, item = %item, "Failed: {}", reason);
        if let Err(e) = self.ctx.ledger.record_failure(item).await {
            tracing::error!(item = %item, "Could not record failure: {}", e);
        }
        self.ctx.retry.push(item.clone());
    }

    /// Another attempt at an item from the retry queue
    async fn process_retry(&self, session: &mut dyn PageSession, item: &WorkItem) {
        let reason = match self.ctx.pipeline.process(session, item).await {
            Outcome::Success(record) => match self.persist(item, &record).await {
                Ok(()) => {
                    if let Err(e) = self.ctx.ledger.remove_failure(item.id()).await {
                        tracing::error!(
                            item = %item,
                            "Saved record but could not clear its failure row: {}",
                            e
                        );
                    }
                    tracing::info!(worker = %self.name, item = %item, "Retry succeeded");
                    return;
                }
                Err(reason) => reason,
            },
            Outcome::Failure(reason) => reason,
        };

        tracing::warn!(worker = %self.name, item = %item, "Retry failed, re-queuing: {}", reason);
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.ctx.retry_backoff) => {}
        }
        self.ctx.retry.push(item.clone());
    }

    async fn persist(&self, item: &WorkItem, record: &Record) -> Result<(), FailureReason> {
        self.ctx
            .ledger
            .record_success(item.id(), record)
            .await
            .map_err(|e| {
                tracing::error!(item = %item, "Could not save record: {}", e);
                FailureReason::Persist(e.to_string())
            })
    }
}
