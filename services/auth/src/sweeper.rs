//! Scheduled removal of expired refresh tokens

use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::repositories::{RefreshTokenRepository, StoreResult};

#[derive(Clone)]
pub struct TokenSweeper {
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
}

impl TokenSweeper {
    pub fn new(refresh_tokens: Arc<dyn RefreshTokenRepository>) -> Self {
        Self { refresh_tokens }
    }

    /// Delete every expired token once. Returns the count.
    pub async fn sweep(&self) -> StoreResult<u64> {
        let deleted = self.refresh_tokens.delete_expired().await?;
        info!(deleted, "Expired refresh tokens swept");
        Ok(deleted)
    }

    /// Run [`sweep`](Self::sweep) on a cron schedule. The returned scheduler
    /// must be kept alive and shut down by the caller.
    pub async fn start(&self, schedule: &str) -> Result<JobScheduler> {
        let sweeper = self.clone();

        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(schedule, move |_, _| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                if let Err(e) = sweeper.sweep().await {
                    error!(error = %e, "Refresh token sweep failed");
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("Started refresh token sweeper with schedule: {}", schedule);
        Ok(scheduler)
    }
}
