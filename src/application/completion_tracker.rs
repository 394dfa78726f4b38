//! Completion tracking for dispatched jobs
//!
//! Persisted attempt state is the only input. The tracker polls it right
//! after dispatch and then on a fixed interval, and releases the dedup slot
//! on every exit path so an abandoned job never blocks its query for good.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::dedup_registry::DedupRegistry;
use crate::domain::job_status::JobStatus;
use crate::domain::repositories::PersistenceGateway;
use crate::domain::search_job::{JobId, NormalizedQuery};
use crate::infrastructure::config::CompletionConfig;

/// Why tracking stopped. Every variant releases the registry slot.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// Every attempt reached a terminal state.
    Complete,
    /// At or above the approximate-completion threshold.
    Approximate { percentage: f64 },
    /// Nothing was dispatched.
    Empty,
    /// Poll budget exhausted.
    TimedOut,
    /// Status could not be read.
    Failed { error: String },
    Cancelled,
}

impl fmt::Display for CompletionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Approximate { percentage } => {
                write!(f, "approximately complete ({percentage:.2}%)")
            }
            Self::Empty => write!(f, "empty"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

pub struct CompletionTracker {
    gateway: Arc<dyn PersistenceGateway>,
    registry: Arc<DedupRegistry>,
    config: CompletionConfig,
    shutdown: CancellationToken,
}

impl CompletionTracker {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        registry: Arc<DedupRegistry>,
        config: CompletionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self { gateway, registry, config, shutdown }
    }

    /// Decides whether `status` ends tracking.
    fn evaluate(&self, status: &JobStatus) -> Option<CompletionOutcome> {
        if status.total == 0 {
            return Some(CompletionOutcome::Empty);
        }
        if status.is_fully_resolved() {
            return Some(CompletionOutcome::Complete);
        }
        if status.percentage >= self.config.approximate_completion_pct {
            return Some(CompletionOutcome::Approximate { percentage: status.percentage });
        }
        None
    }

    /// Polls until the job is done, then releases `query`'s registry slot.
    pub async fn watch(&self, job_id: JobId, query: &NormalizedQuery) -> CompletionOutcome {
        let outcome = self.poll_until_done(job_id).await;

        match &outcome {
            CompletionOutcome::Complete | CompletionOutcome::Empty => {
                info!(job_id = %job_id, "🏁 Job {}", outcome);
            }
            CompletionOutcome::Approximate { .. } => {
                info!(job_id = %job_id, "🏁 Job {}, releasing query slot", outcome);
            }
            CompletionOutcome::TimedOut => {
                warn!(
                    job_id = %job_id,
                    "Completion polling gave up after {} polls; forcing release",
                    self.config.max_polls
                );
            }
            CompletionOutcome::Failed { error } => {
                error!(job_id = %job_id, "Completion check failed, forcing release: {}", error);
            }
            CompletionOutcome::Cancelled => {
                warn!(job_id = %job_id, "Completion tracking cancelled by shutdown");
            }
        }

        self.registry.release(query, job_id).await;
        outcome
    }

    async fn poll_until_done(&self, job_id: JobId) -> CompletionOutcome {
        // 디스패치 직후 1회 + 주기적으로 max_polls 회
        for poll in 0..=self.config.max_polls {
            if poll > 0 {
                tokio::select! {
                    () = self.shutdown.cancelled() => return CompletionOutcome::Cancelled,
                    () = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }

            let status = match self.gateway.job_status(job_id).await {
                Ok(status) => status,
                Err(e) => return CompletionOutcome::Failed { error: format!("{e:#}") },
            };
            info!(
                job_id = %job_id,
                "📊 Progress {}/{} ({:.2}%), {} failed, {} items",
                status.completed, status.total, status.percentage, status.failed, status.total_items
            );

            if let Some(outcome) = self.evaluate(&status) {
                return outcome;
            }
        }
        CompletionOutcome::TimedOut
    }
}
