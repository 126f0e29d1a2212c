use chrono::{DateTime, Utc};
use poputka_core::{PurgeReport, RepositoryResult, RideRepository};
use poputka_store::app_config::RetentionConfig;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info};

/// Periodically deletes rides and bookings past the retention age
pub struct RetentionSweeper {
    repo: Arc<dyn RideRepository>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(repo: Arc<dyn RideRepository>, config: RetentionConfig) -> Self {
        Self { repo, config }
    }

    pub async fn sweep_once(&self) -> RepositoryResult<PurgeReport> {
        self.repo.purge_older_than(self.cutoff()).await
    }

    /// Rows created before this instant are expired. An age too large to
    /// subtract keeps everything.
    fn cutoff(&self) -> DateTime<Utc> {
        self.config
            .max_age()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Never returns. A failed cycle is retried after the shorter backoff.
    pub async fn run(self) {
        info!(
            "Retention sweeper started (every {}s, max age {} days)",
            self.config.interval_seconds, self.config.max_age_days
        );
        loop {
            let pause = match self.sweep_once().await {
                Ok(report) => {
                    info!(
                        "Retention sweep removed {} rides and {} bookings",
                        report.rides, report.bookings
                    );
                    self.config.interval()
                }
                Err(e) => {
                    error!("Retention sweep failed: {}", e);
                    self.config.retry()
                }
            };
            sleep(pause).await;
        }
    }
}
