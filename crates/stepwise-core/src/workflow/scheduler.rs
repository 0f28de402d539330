//! Cron scheduler wrapping `tokio-cron-scheduler` for schedule triggers.
//!
//! Each distinct cron string gets exactly one job, however many workflows
//! share it. When a job fires it publishes a `ScheduleTick` on the
//! [`EventBus`]; the trigger router then matches the tick to every workflow
//! declaring that cron string.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use stepwise_types::run::ScheduleTick;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use super::cron::{normalize_cron, to_job_expression};
use crate::event::EventBus;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Failed to create or manipulate a cron job.
    #[error("scheduler error: {0}")]
    JobError(String),

    /// Invalid cron expression.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The scheduler has not been started.
    #[error("scheduler not started")]
    NotStarted,

    /// No job is registered for this cron string.
    #[error("no job scheduled for '{0}'")]
    NotScheduled(String),
}

// ---------------------------------------------------------------------------
// CronScheduler
// ---------------------------------------------------------------------------

/// Schedule source: turns cron strings into `ScheduleTick` activations.
pub struct CronScheduler {
    inner: Arc<RwLock<Option<JobScheduler>>>,
    /// Normalized cron string -> job id.
    jobs: Arc<RwLock<BTreeMap<String, Uuid>>>,
    bus: EventBus,
}

impl CronScheduler {
    /// Create a scheduler (not yet started) publishing into `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            jobs: Arc::new(RwLock::new(BTreeMap::new())),
            bus,
        }
    }

    /// Start the scheduler. Must be called before scheduling.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        *self.inner.write().await = Some(scheduler);

        tracing::info!("cron scheduler started");
        Ok(())
    }

    /// Stop the scheduler and forget all jobs.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if let Some(mut scheduler) = self.inner.write().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            tracing::info!("cron scheduler stopped");
        }
        self.jobs.write().await.clear();
        Ok(())
    }

    /// Register a job for a 5-field `cron` string.
    ///
    /// Returns `false` if an equivalent string is already scheduled.
    pub async fn schedule(&self, cron: &str) -> Result<bool, SchedulerError> {
        let normalized = normalize_cron(cron);
        // Held until the job is recorded so concurrent callers cannot both add it.
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&normalized) {
            return Ok(false);
        }

        let job_expr =
            to_job_expression(&normalized).map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let inner = self.inner.read().await;
        let scheduler = inner.as_ref().ok_or(SchedulerError::NotStarted)?;

        let bus = self.bus.clone();
        let tick_cron = normalized.clone();
        let job = Job::new_async(job_expr.as_str(), move |_uuid, _lock| {
            let bus = bus.clone();
            let cron = tick_cron.clone();
            Box::pin(async move {
                let fired_at = Utc::now();
                tracing::debug!(cron = cron.as_str(), %fired_at, "cron trigger fired");
                bus.publish(ScheduleTick { cron, fired_at });
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let job_id = job.guid();
        scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        jobs.insert(normalized.clone(), job_id);

        tracing::info!(cron = normalized.as_str(), %job_id, "cron job scheduled");
        Ok(true)
    }

    /// Remove the job for `cron`.
    pub async fn unschedule(&self, cron: &str) -> Result<(), SchedulerError> {
        let normalized = normalize_cron(cron);
        let job_id = self
            .jobs
            .write()
            .await
            .remove(&normalized)
            .ok_or_else(|| SchedulerError::NotScheduled(normalized.clone()))?;

        if let Some(scheduler) = self.inner.read().await.as_ref() {
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        }

        tracing::info!(cron = normalized.as_str(), "cron job unscheduled");
        Ok(())
    }

    /// Make the scheduled set equal `crons`: add missing jobs, remove stale
    /// ones.
    pub async fn sync(&self, crons: &[String]) -> Result<(), SchedulerError> {
        let wanted: BTreeSet<String> = crons.iter().map(|c| normalize_cron(c)).collect();
        let stale: Vec<String> = self
            .jobs
            .read()
            .await
            .keys()
            .filter(|c| !wanted.contains(*c))
            .cloned()
            .collect();

        for cron in stale {
            self.unschedule(&cron).await?;
        }
        for cron in &wanted {
            self.schedule(cron).await?;
        }
        Ok(())
    }

    /// Scheduled cron strings, sorted.
    pub async fn scheduled(&self) -> Vec<String> {
        self.jobs.read().await.keys().cloned().collect()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler").field("bus", &self.bus).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> CronScheduler {
        CronScheduler::new(EventBus::new(16))
    }

    #[tokio::test]
    async fn start_stop() {
        let scheduler = scheduler();
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.job_count().await, 0);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn one_job_per_distinct_cron() {
        let scheduler = scheduler();
        scheduler.start().await.unwrap();

        assert!(scheduler.schedule("*/5 * * * *").await.unwrap());
        assert!(!scheduler.schedule("*/5  *  * * *").await.unwrap());
        assert!(scheduler.schedule("0 9 * * 1").await.unwrap());
        assert_eq!(scheduler.job_count().await, 2);

        scheduler.unschedule("*/5 * * * *").await.unwrap();
        assert_eq!(scheduler.scheduled().await, vec!["0 9 * * 1"]);

        scheduler.stop().await.unwrap();
        assert_eq!(scheduler.job_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_schedule_adds_one_job() {
        let scheduler = Arc::new(scheduler());
        scheduler.start().await.unwrap();

        let first = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.schedule("0 9 * * *").await })
        };
        let second = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.schedule("0  9 * * *").await })
        };
        let added = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];

        assert_eq!(added.iter().filter(|added| **added).count(), 1);
        assert_eq!(scheduler.job_count().await, 1);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn sync_adds_and_removes() {
        let scheduler = scheduler();
        scheduler.start().await.unwrap();
        scheduler.schedule("0 1 * * *").await.unwrap();

        scheduler
            .sync(&["0 2 * * *".to_string(), "0 3 * * *".to_string()])
            .await
            .unwrap();
        assert_eq!(scheduler.scheduled().await, vec!["0 2 * * *", "0 3 * * *"]);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn schedule_before_start_fails() {
        let result = scheduler().schedule("0 9 * * *").await;
        assert!(matches!(result, Err(SchedulerError::NotStarted)));
    }

    #[tokio::test]
    async fn six_field_expression_is_rejected() {
        let scheduler = scheduler();
        scheduler.start().await.unwrap();
        let result = scheduler.schedule("0 0 9 * * *").await;
        assert!(matches!(result, Err(SchedulerError::InvalidSchedule(_))));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unschedule_unknown_fails() {
        let scheduler = scheduler();
        let result = scheduler.unschedule("0 9 * * *").await;
        assert!(matches!(result, Err(SchedulerError::NotScheduled(_))));
    }
}
