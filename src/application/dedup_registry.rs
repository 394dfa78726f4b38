//! In-flight query registry
//!
//! Maps a normalized query to the job currently crawling it. An entry is
//! added at admission and removed by the completion tracker (full or
//! approximate completion, poll budget exhausted, or polling error). The map
//! itself is never handed out; every check-then-write happens under one lock
//! and the lock is never held across I/O.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::search_job::{JobId, NormalizedQuery};

/// Result of [`DedupRegistry::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The query was free; the caller now owns this freshly minted job id.
    Admitted(JobId),
    /// Another job is already crawling this query.
    InFlight(JobId),
}

impl Admission {
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        match self {
            Self::Admitted(id) | Self::InFlight(id) => *id,
        }
    }
}

#[derive(Debug, Default)]
pub struct DedupRegistry {
    entries: Mutex<HashMap<NormalizedQuery, JobId>>,
}

static PROCESS_REGISTRY: OnceCell<Arc<DedupRegistry>> = OnceCell::new();

/// The registry shared by every service in this process.
pub fn dedup_registry() -> Arc<DedupRegistry> {
    PROCESS_REGISTRY.get_or_init(|| Arc::new(DedupRegistry::default())).clone()
}

impl DedupRegistry {
    /// Returns the in-flight job for `query`, or claims the slot with a new job id.
    pub async fn admit(&self, query: &NormalizedQuery) -> Admission {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(query) {
            debug!("Query '{}' already in flight as job {}", query, existing);
            return Admission::InFlight(*existing);
        }
        let job_id = JobId::new();
        entries.insert(query.clone(), job_id);
        Admission::Admitted(job_id)
    }

    /// Removes the entry only while it still maps to `job_id`.
    pub async fn release(&self, query: &NormalizedQuery, job_id: JobId) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(query) {
            Some(current) if *current == job_id => {
                entries.remove(query);
                debug!("Released query '{}' (job {})", query, job_id);
                true
            }
            Some(current) => {
                warn!(
                    "Query '{}' now belongs to job {}; release by job {} ignored",
                    query, current, job_id
                );
                false
            }
            None => false,
        }
    }

    pub async fn lookup(&self, query: &NormalizedQuery) -> Option<JobId> {
        self.entries.lock().await.get(query).copied()
    }

    pub async fn in_flight(&self) -> usize {
        self.entries.lock().await.len()
    }
}
