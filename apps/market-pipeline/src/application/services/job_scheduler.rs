//! Batch Job Scheduler
//!
//! Runs registered [`BatchJob`]s once a day at a fixed UTC time. The
//! schedule is checked every minute; a job whose time has already passed
//! when it is registered first runs on the following day. Jobs run one
//! after another and a failure is logged without affecting the others.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use crate::application::ports::BatchJob;
use crate::infrastructure::metrics;

/// Default schedule check period.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

struct ScheduledJob {
    job: Arc<dyn BatchJob>,
    at: NaiveTime,
    next_run: DateTime<Utc>,
}

/// Daily job scheduler.
pub struct JobScheduler {
    jobs: Vec<ScheduledJob>,
    check_interval: Duration,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            jobs: Vec::new(),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Override the check period.
    #[must_use]
    pub const fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Register `job` to run daily at `at` (UTC).
    pub fn register(&mut self, job: Arc<dyn BatchJob>, at: NaiveTime) {
        self.register_at(job, at, Utc::now());
    }

    fn register_at(&mut self, job: Arc<dyn BatchJob>, at: NaiveTime, now: DateTime<Utc>) {
        let next_run = next_occurrence(at, now);
        tracing::info!(job = job.name(), at = %at, next_run = %next_run, "Batch job registered");
        self.jobs.push(ScheduledJob { job, at, next_run });
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no jobs are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Next scheduled run per job, in registration order.
    #[must_use]
    pub fn next_runs(&self) -> Vec<(String, DateTime<Utc>)> {
        self.jobs
            .iter()
            .map(|s| (s.job.name().to_string(), s.next_run))
            .collect()
    }

    /// Jobs due at `now`; each returned job is rescheduled for its next day.
    fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Arc<dyn BatchJob>> {
        self.jobs
            .iter_mut()
            .filter(|s| s.next_run <= now)
            .map(|s| {
                s.next_run = next_occurrence(s.at, now);
                Arc::clone(&s.job)
            })
            .collect()
    }

    /// Run every job due at `now`. Returns how many ran successfully.
    pub async fn run_pending(&mut self, now: DateTime<Utc>) -> usize {
        let mut succeeded = 0;

        for job in self.take_due(now) {
            let started = Instant::now();
            tracing::info!(job = job.name(), "Batch job starting");

            match job.run().await {
                Ok(()) => {
                    succeeded += 1;
                    metrics::record_job_run(job.name(), true, started.elapsed());
                    tracing::info!(
                        job = job.name(),
                        elapsed_ms = started.elapsed().as_millis(),
                        "Batch job finished"
                    );
                }
                Err(e) => {
                    metrics::record_job_run(job.name(), false, started.elapsed());
                    tracing::error!(job = job.name(), error = %e, "Batch job failed");
                }
            }
        }

        succeeded
    }

    /// Check the schedule every interval until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(jobs = self.jobs.len(), "Job scheduler started");

        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Job scheduler stopped");
                    return;
                }
                _ = interval.tick() => {
                    self.run_pending(Utc::now()).await;
                }
            }
        }
    }
}

/// First instant strictly after `now` whose UTC time of day is `at`.
fn next_occurrence(at: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}
