//! Job queues and their workers.
//!
//! There is one unbounded FIFO and one worker task per [`OperationKind`].
//! A worker runs its jobs strictly one after another, which is what keeps two
//! toolchain processes of the same kind from ever overlapping. Kinds are
//! independent of each other.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use super::error::SubmitError;
use super::job::{self, diagnostic_block};
use super::models::{JobSpec, OperationKind};
use super::stream::{self, JobHandle, ResultSender};
use super::tracker::JobTracker;
use crate::config::AppConfig;

struct QueueEntry {
    id: String,
    spec: JobSpec,
    results: ResultSender,
}

/// Submission side of one kind's queue.
struct JobQueue {
    tx: mpsc::UnboundedSender<QueueEntry>,
}

impl JobQueue {
    fn push(&self, entry: QueueEntry) -> Result<(), SubmitError> {
        self.tx.send(entry).map_err(|_| SubmitError::ShuttingDown)
    }
}

struct Queues {
    program: JobQueue,
    flash: JobQueue,
    list: JobQueue,
}

impl Queues {
    fn get(&self, kind: OperationKind) -> &JobQueue {
        match kind {
            OperationKind::Program => &self.program,
            OperationKind::Flash => &self.flash,
            OperationKind::List => &self.list,
        }
    }
}

/// Owns the queues and workers for every operation kind.
///
/// Cheap to clone; all clones share the same queues.
#[derive(Clone)]
pub struct JobService {
    queues: Arc<Queues>,
    tracker: JobTracker,
    shutdown: CancellationToken,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl JobService {
    /// Create the work directories and spawn one worker per kind.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: Arc<AppConfig>) -> Result<Self> {
        std::fs::create_dir_all(&config.script_dir).with_context(|| {
            format!(
                "Failed to create script directory {}",
                config.script_dir.display()
            )
        })?;
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", config.log_dir.display())
        })?;

        let tracker = JobTracker::new();
        let shutdown = CancellationToken::new();
        let mut workers = Vec::with_capacity(OperationKind::ALL.len());

        let mut spawn = |kind: OperationKind| {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = Worker {
                kind,
                rx,
                config: config.clone(),
                tracker: tracker.clone(),
                shutdown: shutdown.clone(),
            };
            workers.push(tokio::spawn(worker.run()));
            JobQueue { tx }
        };

        let queues = Queues {
            program: spawn(OperationKind::Program),
            flash: spawn(OperationKind::Flash),
            list: spawn(OperationKind::List),
        };

        info!(
            script_dir = %config.script_dir.display(),
            log_dir = %config.log_dir.display(),
            "Job service started"
        );

        Ok(Self {
            queues: Arc::new(queues),
            tracker,
            shutdown,
            workers: Arc::new(Mutex::new(workers)),
        })
    }

    /// Validate and queue a job. Returns immediately with the job's handle.
    pub async fn submit(&self, spec: JobSpec) -> Result<JobHandle, SubmitError> {
        if self.shutdown.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }
        spec.validate()?;

        let kind = spec.kind();
        let id = Uuid::now_v7().to_string();
        let (results, handle) = stream::channel(id.clone(), kind);

        self.tracker.enqueue(&id, kind, spec.server()).await;

        let entry = QueueEntry {
            id: id.clone(),
            spec,
            results,
        };
        if let Err(e) = self.queues.get(kind).push(entry) {
            self.tracker.remove(&id).await;
            return Err(e);
        }

        debug!(job_id = %id, kind = %kind, "Job queued");
        Ok(handle)
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting jobs, let in-flight jobs finish, cancel queued ones and
    /// wait for every worker to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker task failed during shutdown");
            }
        }

        info!("Job service stopped");
    }
}

/// Run one job in its own task. A panic surfaces as a JoinError and is
/// reported on the job's stream instead of taking the worker down.
async fn run_isolated<F>(job: F, id: &str, kind: OperationKind, results: &ResultSender)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Err(e) = tokio::spawn(job).await {
        error!(job_id = %id, kind = %kind, error = %e, "Job task failed");
        results.log(diagnostic_block("Worker Fault", e));
    }
}

struct Worker {
    kind: OperationKind,
    rx: mpsc::UnboundedReceiver<QueueEntry>,
    config: Arc<AppConfig>,
    tracker: JobTracker,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        info!(kind = %self.kind, "Worker started");

        loop {
            let entry = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                entry = self.rx.recv() => match entry {
                    Some(entry) => entry,
                    None => break,
                },
            };

            self.process(entry).await;
        }

        self.drain().await;
        info!(kind = %self.kind, "Worker stopped");
    }

    async fn process(&self, entry: QueueEntry) {
        let QueueEntry { id, spec, results } = entry;
        self.tracker.start(&id).await;

        let span = info_span!("job", job_id = %id, kind = %self.kind, server = %spec.server());
        let config = self.config.clone();
        let job_results = results.clone();

        run_isolated(
            async move { job::execute(&spec, &config, &job_results).await }.instrument(span),
            &id,
            self.kind,
            &results,
        )
        .await;

        results.end();
        self.tracker.remove(&id).await;
    }

    /// Answer every job still waiting in the queue so no consumer hangs.
    async fn drain(&mut self) {
        self.rx.close();

        while let Some(entry) = self.rx.recv().await {
            debug!(job_id = %entry.id, kind = %self.kind, "Cancelling queued job");
            entry.results.log(diagnostic_block(
                "Job Cancelled",
                "The job service is shutting down; this job was never started.",
            ));
            entry.results.end();
            self.tracker.remove(&entry.id).await;
        }
    }
}
