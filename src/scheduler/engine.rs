use crate::archiver::ReportsArchiver;
use crate::config::ArchiverSection;
use anyhow::{Context, Result};
use chrono::Utc;
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// When the next archive cycle fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fixed delay between cycles; the first one fires immediately.
    Interval(Duration),
    /// Cron expression with a seconds field, e.g. `0 0 3 * * *`.
    Cron(Box<CronSchedule>),
}

impl Trigger {
    pub fn from_config(section: &ArchiverSection) -> Result<Self> {
        match &section.schedule {
            Some(expr) => {
                let schedule = CronSchedule::from_str(expr)
                    .with_context(|| format!("Invalid cron expression '{expr}'"))?;
                Ok(Trigger::Cron(Box::new(schedule)))
            }
            None => Ok(Trigger::Interval(Duration::from_secs(section.interval_secs))),
        }
    }

    /// How long to sleep before the next cron fire time, if any remains.
    fn until_next_fire(schedule: &CronSchedule) -> Option<Duration> {
        let now = Utc::now();
        let next = schedule.after(&now).next()?;
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Main scheduler loop. Never returns while the trigger has future fire times.
///
/// Each tick hands a whole cycle to the runtime and moves on; it never waits
/// for the cycle to finish.
pub async fn run_archive_loop(archiver: Arc<ReportsArchiver>, trigger: Trigger) {
    info!(?trigger, "Archive scheduler started");

    match trigger {
        Trigger::Interval(period) => {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                fire(&archiver);
            }
        }
        Trigger::Cron(schedule) => loop {
            let Some(delay) = Trigger::until_next_fire(&schedule) else {
                warn!("Cron schedule has no upcoming fire times; archive scheduler stopping");
                return;
            };
            debug!(delay_secs = delay.as_secs(), "Waiting for next archive cycle");
            tokio::time::sleep(delay).await;
            fire(&archiver);
        },
    }
}

fn fire(archiver: &Arc<ReportsArchiver>) {
    if !archiver.is_enabled() {
        debug!("Archiver disabled; skipping tick");
        return;
    }
    // Detached: the handle is dropped on purpose.
    let _ = archiver.archive();
}
