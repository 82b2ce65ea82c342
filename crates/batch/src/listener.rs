//! Observers for job and skip events. Listeners never change control flow.

use std::fmt::Debug;

use tracing::{info, warn};

use crate::error::ItemError;
use crate::execution::JobExecution;

/// Called around each job execution.
pub trait JobListener: Send + Sync {
    fn before_job(&self, _execution: &JobExecution) {}

    fn after_job(&self, _execution: &JobExecution) {}
}

/// Called whenever a chunk step skips an item.
pub trait SkipListener<T, R>: Send + Sync {
    /// The reader failed, so there is no item to hand over.
    fn on_skip_in_read(&self, _error: &ItemError) {}

    fn on_skip_in_process(&self, _item: &T, _error: &ItemError) {}

    fn on_skip_in_write(&self, _item: &R, _error: &ItemError) {}
}

/// Reports job and skip events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl JobListener for LoggingListener {
    fn before_job(&self, execution: &JobExecution) {
        info!(
            job = %execution.job_name(),
            execution_id = %execution.id,
            parameters = %execution.parameters.job_key(),
            "job starting"
        );
    }

    fn after_job(&self, execution: &JobExecution) {
        let steps = execution.step_names().join(",");
        info!(
            job = %execution.job_name(),
            execution_id = %execution.id,
            status = %execution.status,
            steps = %steps,
            "job finished"
        );
    }
}

impl<T: Debug, R: Debug> SkipListener<T, R> for LoggingListener {
    fn on_skip_in_read(&self, error: &ItemError) {
        warn!(error = %error, "skipped record on read");
    }

    fn on_skip_in_process(&self, item: &T, error: &ItemError) {
        warn!(item = ?item, error = %error, "skipped item on process");
    }

    fn on_skip_in_write(&self, item: &R, error: &ItemError) {
        warn!(item = ?item, error = %error, "skipped item on write");
    }
}
