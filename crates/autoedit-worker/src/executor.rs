//! Bounded job executor.
//!
//! Submitted job ids wait in a bounded channel; a dispatcher task starts each
//! one as soon as a concurrency permit is free.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use autoedit_models::JobId;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::processor::JobEngine;

/// Error recorded when a job task panics.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal error while processing job";

/// Worker pool running jobs on the tokio runtime.
pub struct JobExecutor {
    sender: Mutex<Option<mpsc::Sender<JobId>>>,
    job_semaphore: Arc<Semaphore>,
    max_concurrent_jobs: usize,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl JobExecutor {
    /// Start the dispatcher. Must be called inside a tokio runtime.
    pub fn start(engine: JobEngine, config: &WorkerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let max_concurrent_jobs = config.max_concurrent_jobs.max(1);
        let job_semaphore = Arc::new(Semaphore::new(max_concurrent_jobs));

        info!(
            "Starting job executor with {} max concurrent jobs, queue capacity {}",
            max_concurrent_jobs, config.queue_capacity
        );

        let dispatcher = tokio::spawn(Self::dispatch(
            Arc::new(engine),
            receiver,
            Arc::clone(&job_semaphore),
        ));

        Self {
            sender: Mutex::new(Some(sender)),
            job_semaphore,
            max_concurrent_jobs,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queue a job without waiting.
    pub async fn submit(&self, id: JobId) -> WorkerResult<()> {
        let sender = self.sender.lock().await;
        let sender = sender.as_ref().ok_or(WorkerError::ShutDown)?;

        sender.try_send(id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(id) => {
                warn!(job_id = %id, "Job queue is full");
                WorkerError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => WorkerError::ShutDown,
        })
    }

    /// Number of jobs currently running.
    pub fn running_jobs(&self) -> usize {
        self.max_concurrent_jobs - self.job_semaphore.available_permits()
    }

    /// Stop accepting jobs and wait up to `timeout` for queued and running jobs.
    pub async fn shutdown(&self, timeout: Duration) {
        // Dropping the sender lets the dispatcher drain the queue and exit
        self.sender.lock().await.take();

        let Some(dispatcher) = self.dispatcher.lock().await.take() else {
            return;
        };

        info!("Waiting for in-flight jobs to complete...");
        let drained = async {
            if let Err(e) = dispatcher.await {
                error!("Job dispatcher ended abnormally: {}", e);
            }
            // Every running job holds a permit until it finishes
            let _ = self
                .job_semaphore
                .acquire_many(self.max_concurrent_jobs as u32)
                .await;
        };

        if tokio::time::timeout(timeout, drained).await.is_err() {
            warn!("Timed out waiting for in-flight jobs");
        } else {
            info!("Job executor stopped");
        }
    }

    async fn dispatch(
        engine: Arc<JobEngine>,
        mut receiver: mpsc::Receiver<JobId>,
        job_semaphore: Arc<Semaphore>,
    ) {
        while let Some(id) = receiver.recv().await {
            let permit = match Arc::clone(&job_semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("Job semaphore closed, stopping dispatcher");
                    break;
                }
            };

            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(engine, id).await;
            });
        }
    }

    /// Run one job, converting a panic into a failed status.
    async fn execute_job(engine: Arc<JobEngine>, id: JobId) {
        let task = {
            let engine = Arc::clone(&engine);
            let id = id.clone();
            tokio::spawn(async move { engine.run(&id).await })
        };

        if let Err(e) = task.await {
            error!(job_id = %id, "Job task failed: {}", e);
            engine.fail(&id, INTERNAL_ERROR_MESSAGE).await;
        }
    }
}
