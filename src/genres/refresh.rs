//! Periodic genre refresh
//!
//! Re-runs the genre fetch for every stored language on a fixed period, so
//! genres added upstream show up without a restart. Existing records are
//! never modified or removed.

use super::GenreResolver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Handle to the background refresh task
///
/// Dropping the handle without calling [`GenreRefreshTask::shutdown`] also
/// stops the task at its next wake-up.
pub struct GenreRefreshTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl GenreRefreshTask {
    /// Spawns the refresh loop; the first refresh happens one period from now
    pub fn start(resolver: Arc<GenreResolver>, api_key: String, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel();

        info!(?period, "Scheduling genre updates");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => refresh_all(&resolver, &api_key).await,
                }
            }

            debug!("Genre refresh task stopped");
        });

        Self { shutdown, handle }
    }

    /// Stops the task, waiting for a refresh in progress to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            error!(error = %e, "Genre refresh task ended abnormally");
        }
    }
}

async fn refresh_all(resolver: &GenreResolver, api_key: &str) {
    let languages = match resolver.stored_languages() {
        Ok(languages) => languages,
        Err(e) => {
            error!(error = %e, "Could not list languages for genre refresh");
            return;
        }
    };

    info!(count = languages.len(), "Starting genre update");
    for language in languages {
        if let Err(e) = resolver.fetch_and_store(&language, api_key).await {
            error!(%language, error = %e, "Error during genres update");
        }
    }
}
