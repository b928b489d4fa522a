use anyhow::Result;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info, trace};

use crate::config::RetentionConfig;
use crate::services::ImportJobService;

/// Periodic retention sweep: removes terminal jobs older than the
/// configured age, on a cron schedule.
pub struct RetentionService {
    jobs: Arc<ImportJobService>,
    schedule: Schedule,
    sweep_cron: String,
    max_age_days: i64,
    last_run: Option<DateTime<Utc>>,
}

impl RetentionService {
    pub fn new(jobs: Arc<ImportJobService>, config: &RetentionConfig) -> Result<Self> {
        let schedule = Schedule::from_str(&config.sweep_cron)
            .map_err(|e| anyhow::anyhow!("invalid retention cron '{}': {}", config.sweep_cron, e))?;
        Ok(Self {
            jobs,
            schedule,
            sweep_cron: config.sweep_cron.clone(),
            max_age_days: config.max_age_days,
            last_run: None,
        })
    }

    pub async fn start(mut self) {
        info!(
            "Starting retention service (cron: {}, max age: {} days)",
            self.sweep_cron, self.max_age_days
        );
        if let Some(next) = self.schedule.upcoming(Utc).next() {
            info!(
                "Next retention sweep: {}",
                next.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }

        // Spread startup load when several instances share a clock
        let jitter = fastrand::u64(0..5000);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let mut interval = interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            trace!("Retention tick");

            let now = Utc::now();
            if self.last_run.is_none() {
                // First tick arms the schedule; sweeps start from the next
                // cron boundary
                self.last_run = Some(now);
                continue;
            }
            if self.should_run(now) {
                self.last_run = Some(now);
                match self.jobs.cleanup(self.max_age_days).await {
                    Ok(cleaned) => {
                        info!("Retention sweep removed {} jobs", cleaned);
                    }
                    Err(e) => error!("Retention sweep failed: {}", e),
                }
            }
        }
    }

    fn should_run(&self, now: DateTime<Utc>) -> bool {
        match self.last_run {
            Some(last) => self
                .schedule
                .after(&last)
                .next()
                .map(|next| now >= next)
                .unwrap_or(false),
            // First tick only arms the schedule
            None => false,
        }
    }
}
