//! Rate-limited dispatch queue for upstream calls
//!
//! Every outbound call goes through one [`DispatchQueue`]. A single worker
//! task drains the queue in FIFO order, runs one job at a time and keeps a
//! minimum interval between the starts of consecutive jobs. Each caller gets
//! its own result back through a oneshot channel, so a failing, slow or
//! panicking job only affects its own caller.

use crate::upstream::UpstreamError;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};
use ulid::Ulid;

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A type-erased unit of work waiting in the queue
struct QueuedJob {
    id: Ulid,
    run: Box<dyn FnOnce() -> JobFuture + Send>,
}

/// Handle to the shared dispatch queue
///
/// Cloning is cheap; all clones feed the same worker. The worker stops once
/// every handle has been dropped and the remaining jobs have run.
#[derive(Clone)]
pub struct DispatchQueue {
    sender: mpsc::UnboundedSender<QueuedJob>,
    job_timeout: Duration,
}

impl DispatchQueue {
    /// Starts the worker task
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `min_interval` - Minimum time between the starts of two jobs
    /// * `job_timeout` - Upper bound on the runtime of a single job
    pub fn new(min_interval: Duration, job_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(receiver, min_interval));

        Self {
            sender,
            job_timeout,
        }
    }

    /// Enqueues a job and waits for its result
    ///
    /// Jobs are never rejected and cannot be cancelled once enqueued; dropping
    /// the returned future only discards the result.
    pub async fn submit<T, F, Fut>(&self, action: F) -> Result<T, UpstreamError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let timeout = self.job_timeout;

        let job = QueuedJob {
            id: Ulid::new(),
            run: Box::new(move || -> JobFuture {
                Box::pin(async move {
                    let result = match tokio::time::timeout(timeout, action()).await {
                        Ok(result) => result,
                        Err(_) => Err(UpstreamError::Timeout(timeout)),
                    };
                    // The caller may have gone away; nothing to do then
                    let _ = tx.send(result);
                })
            }),
        };

        debug!(job = %job.id, "Enqueueing upstream job");
        self.sender
            .send(job)
            .map_err(|_| UpstreamError::QueueClosed)?;

        rx.await.map_err(|_| UpstreamError::JobAborted)?
    }
}

async fn run_worker(mut receiver: mpsc::UnboundedReceiver<QueuedJob>, min_interval: Duration) {
    let mut last_start: Option<Instant> = None;

    while let Some(job) = receiver.recv().await {
        if let Some(previous) = last_start {
            tokio::time::sleep_until(previous + min_interval).await;
        }
        last_start = Some(Instant::now());

        debug!(job = %job.id, "Starting upstream job");

        // A separate task keeps a panicking job from taking the worker down
        if let Err(e) = tokio::spawn((job.run)()).await {
            warn!(job = %job.id, error = %e, "Upstream job aborted");
        }
    }

    debug!("Dispatch queue closed");
}
