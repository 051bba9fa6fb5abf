//! In-memory registry of queued and running jobs.
//!
//! Entries live from submission until the worker has delivered the end
//! marker. Nothing here is persisted; the job logs are the only record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::models::OperationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedJob {
    pub id: String,
    pub kind: OperationKind,
    pub server: String,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Thread-safe store shared by the submit path, the workers and the web layer.
#[derive(Clone, Default)]
pub struct JobTracker {
    inner: Arc<RwLock<HashMap<String, TrackedJob>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a freshly submitted job.
    pub async fn enqueue(&self, id: &str, kind: OperationKind, server: &str) {
        let mut map = self.inner.write().await;
        map.insert(
            id.to_string(),
            TrackedJob {
                id: id.to_string(),
                kind,
                server: server.to_string(),
                state: JobState::Queued,
                submitted_at: Utc::now(),
                started_at: None,
            },
        );
    }

    /// Mark a job as picked up by its worker.
    pub async fn start(&self, id: &str) {
        let mut map = self.inner.write().await;
        if let Some(job) = map.get_mut(id) {
            job.state = JobState::Running;
            job.started_at = Some(Utc::now());
        }
    }

    /// Forget a job once its stream has been closed.
    pub async fn remove(&self, id: &str) {
        let mut map = self.inner.write().await;
        map.remove(id);
    }

    /// All tracked jobs, oldest submission first.
    pub async fn get_all(&self) -> Vec<TrackedJob> {
        let map = self.inner.read().await;
        let mut jobs: Vec<TrackedJob> = map.values().cloned().collect();
        jobs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        jobs
    }

    /// Jobs of `kind` picked up by the worker and not yet finished.
    pub async fn running(&self, kind: OperationKind) -> Vec<TrackedJob> {
        let map = self.inner.read().await;
        map.values()
            .filter(|job| job.kind == kind && job.state == JobState::Running)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn only(tracker: &JobTracker) -> Option<TrackedJob> {
        let mut all = tracker.get_all().await;
        assert!(all.len() <= 1);
        all.pop()
    }

    #[tokio::test]
    async fn test_tracker_lifecycle() {
        let tracker = JobTracker::new();
        assert!(only(&tracker).await.is_none());

        tracker
            .enqueue("job-1", OperationKind::Program, "lab-01:3121")
            .await;
        let job = only(&tracker).await.unwrap();
        assert_eq!(job.id, "job-1");
        assert_eq!(job.state, JobState::Queued);
        assert!(job.started_at.is_none());
        assert!(tracker.running(OperationKind::Program).await.is_empty());

        tracker.start("job-1").await;
        let job = only(&tracker).await.unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.started_at.is_some());
        assert_eq!(tracker.running(OperationKind::Program).await.len(), 1);
        assert!(tracker.running(OperationKind::Flash).await.is_empty());

        tracker.remove("job-1").await;
        assert!(only(&tracker).await.is_none());
    }

    #[tokio::test]
    async fn test_tracker_multiple_kinds() {
        let tracker = JobTracker::new();

        tracker.enqueue("a", OperationKind::Program, "s1").await;
        tracker.enqueue("b", OperationKind::Flash, "s1").await;
        tracker.enqueue("c", OperationKind::List, "s2").await;
        tracker.start("b").await;

        let all = tracker.get_all().await;
        assert_eq!(all.len(), 3);
        assert_eq!(
            all.iter().filter(|job| job.state == JobState::Running).count(),
            1
        );
        assert_eq!(tracker.running(OperationKind::Flash).await[0].id, "b");
    }

    #[tokio::test]
    async fn test_start_unknown_job_is_ignored() {
        let tracker = JobTracker::new();
        tracker.start("ghost").await;
        assert!(tracker.get_all().await.is_empty());
    }
}
