//! Sequential job executor.

use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::error::WorkerResult;
use crate::handler::JobHandler;
use crate::source::JobSource;

/// Delay before polling again after a source error.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Pulls jobs from a source and runs them one at a time.
pub struct JobExecutor {
    handler: JobHandler,
    source: Mutex<Box<dyn JobSource>>,
    poll_interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(handler: JobHandler, source: Box<dyn JobSource>, poll_interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            handler,
            source: Mutex::new(source),
            poll_interval,
            shutdown,
        }
    }

    /// Run until the source is exhausted or shutdown is signalled.
    ///
    /// Returns the number of jobs handled. A job in progress always runs to
    /// completion and has its response reported before the loop stops.
    pub async fn run(&self) -> WorkerResult<usize> {
        info!("Starting job executor");

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut source = self.source.lock().await;
        let mut handled = 0usize;

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping executor");
                break;
            }
            if source.is_exhausted() {
                info!("Job source exhausted");
                break;
            }

            let polled = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                polled = source.next_job() => polled,
            };

            let job = match polled {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                    continue;
                }
                Err(e) => {
                    warn!("Failed to fetch job: {}", e);
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                    continue;
                }
            };

            info!(job_id = %job.id, "Processing job");
            let response = self.handler.handle(&job).await;
            handled += 1;

            if let Err(e) = source.complete(&job.id, &response).await {
                error!(job_id = %job.id, "Failed to report job result: {}", e);
            }
        }

        info!("Job executor stopped after {} job(s)", handled);
        Ok(handled)
    }

    /// Signal shutdown. Takes effect even when `run` has not started yet.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
