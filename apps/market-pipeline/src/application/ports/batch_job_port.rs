//! Batch Job Port
//!
//! Periodic ETL work (statement loads, end-of-day prices) lives outside
//! this crate; the scheduler only needs something it can name and run.

use async_trait::async_trait;

/// Job failure, reported by the scheduler and otherwise ignored.
#[derive(Debug, Clone, thiserror::Error)]
#[error("job {job} failed: {message}")]
pub struct JobError {
    /// Job name.
    pub job: String,
    /// Error details.
    pub message: String,
}

/// A job the scheduler can invoke.
#[async_trait]
pub trait BatchJob: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &str;

    /// Run the job to completion.
    async fn run(&self) -> Result<(), JobError>;
}
