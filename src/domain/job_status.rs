//! Aggregate job progress as reported by persistence

use serde::{Deserialize, Serialize};

/// Progress of one job, aggregated over its partition attempts.
///
/// `completed` counts resolved attempts (succeeded or failed), so a job whose
/// remaining partitions all exhausted their proxies still reaches 100%.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JobStatus {
    pub total: i64,
    pub completed: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub pending: i64,
    pub percentage: f64,
    pub total_items: i64,
}

impl JobStatus {
    #[must_use]
    pub fn from_counts(total: i64, succeeded: i64, failed: i64, total_items: i64) -> Self {
        let completed = succeeded + failed;
        let percentage = if total > 0 {
            (completed as f64 / total as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };
        Self {
            total,
            completed,
            succeeded,
            failed,
            pending: (total - completed).max(0),
            percentage,
            total_items,
        }
    }

    /// Every dispatched attempt has reached a terminal state.
    #[must_use]
    pub const fn is_fully_resolved(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }
}
