//! Execution records: job instances, job executions and step executions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chunkflow_core::{Entity, JobExecutionId, JobInstanceId, StepExecutionId, ValueObject};

use crate::parameters::JobParameters;

/// Lifecycle status shared by job and step executions.
///
/// Step executions never use `Stopping`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Starting,
    Executing,
    Completed,
    Failed,
    Stopped,
    Stopping,
}

impl BatchStatus {
    /// Whether an execution in this status still holds its job instance.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Executing | BatchStatus::Stopping
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Stopped
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Executing => "EXECUTING",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Stopping => "STOPPING",
        };
        f.write_str(name)
    }
}

/// Exit code of a step or job; the tag flow transitions are matched against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExitStatus(String);

impl ValueObject for ExitStatus {}

impl ExitStatus {
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const FAILED: &'static str = "FAILED";
    pub const STOPPED: &'static str = "STOPPED";
    pub const EXECUTING: &'static str = "EXECUTING";
    pub const UNKNOWN: &'static str = "UNKNOWN";

    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    pub fn executing() -> Self {
        Self::new(Self::EXECUTING)
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One logical run of a job, identified by job name + identifying parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: JobInstanceId,
    pub job_name: String,
    pub job_key: String,
    pub created_at: DateTime<Utc>,
}

impl JobInstance {
    pub fn new(job_name: impl Into<String>, job_key: impl Into<String>) -> Self {
        Self {
            id: JobInstanceId::new(),
            job_name: job_name.into(),
            job_key: job_key.into(),
            created_at: Utc::now(),
        }
    }
}

impl Entity for JobInstance {
    type Id = JobInstanceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl fmt::Display for JobInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobInstance[{}, job={}, key={}]", self.id, self.job_name, self.job_key)
    }
}

/// Why a job execution ended FAILED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    /// A step failed and no `FAILED` transition handled it.
    StepFailed { step_name: String, message: String },
    /// No transition matched a step's exit code.
    UnresolvedFlow { step_name: String, exit_code: String },
    /// A flow transition explicitly ended the job as failed.
    EndedFailed { step_name: String },
    /// The flow referenced a step the job does not define.
    UnknownStep { step_name: String },
    /// Running the flow hit an error that could not be recorded as a step
    /// outcome, typically a repository failure.
    Aborted { message: String },
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::StepFailed { step_name, message } => {
                write!(f, "step '{step_name}' failed: {message}")
            }
            JobFailure::UnresolvedFlow {
                step_name,
                exit_code,
            } => write!(
                f,
                "no transition from step '{step_name}' matches exit code '{exit_code}'"
            ),
            JobFailure::EndedFailed { step_name } => {
                write!(f, "flow ended as failed after step '{step_name}'")
            }
            JobFailure::UnknownStep { step_name } => write!(f, "unknown step '{step_name}'"),
            JobFailure::Aborted { message } => write!(f, "job aborted: {message}"),
        }
    }
}

/// One attempt to run a job instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: JobExecutionId,
    pub instance: JobInstance,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    /// Steps executed by *this* attempt, in flow order.
    pub step_executions: Vec<StepExecution>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub failure: Option<JobFailure>,
}

impl JobExecution {
    pub fn new(instance: JobInstance, parameters: JobParameters) -> Self {
        Self {
            id: JobExecutionId::new(),
            instance,
            parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            step_executions: Vec::new(),
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            failure: None,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.instance.job_name
    }

    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions.iter().find(|s| s.step_name == step_name)
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.step_executions
            .iter()
            .map(|s| s.step_name.as_str())
            .collect()
    }

    pub(crate) fn mark_started(&mut self) {
        self.status = BatchStatus::Executing;
        self.exit_status = ExitStatus::executing();
        self.start_time = Some(Utc::now());
    }

    pub(crate) fn finish(&mut self, status: BatchStatus, failure: Option<JobFailure>) {
        self.status = status;
        self.exit_status = match status {
            BatchStatus::Completed => ExitStatus::completed(),
            BatchStatus::Stopped => ExitStatus::stopped(),
            BatchStatus::Failed => ExitStatus::failed(),
            _ => ExitStatus::unknown(),
        };
        self.failure = failure;
        self.end_time = Some(Utc::now());
    }
}

impl Entity for JobExecution {
    type Id = JobExecutionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// One step's run within one job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: StepExecutionId,
    pub job_execution_id: JobExecutionId,
    pub step_name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    /// Records consumed from the reader, including records skipped on read.
    pub read_count: u64,
    pub filter_count: u64,
    pub write_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
    pub retry_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub failures: Vec<String>,
}

impl StepExecution {
    pub fn new(job_execution_id: JobExecutionId, step_name: impl Into<String>) -> Self {
        Self {
            id: StepExecutionId::new(),
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            read_count: 0,
            filter_count: 0,
            write_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            retry_count: 0,
            commit_count: 0,
            rollback_count: 0,
            start_time: None,
            end_time: None,
            failures: Vec::new(),
        }
    }

    /// Skips across read, process and write.
    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    pub fn is_complete(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    pub(crate) fn mark_started(&mut self) {
        self.status = BatchStatus::Executing;
        self.exit_status = ExitStatus::executing();
        self.start_time = Some(Utc::now());
    }

    pub(crate) fn mark_completed(&mut self, exit_status: ExitStatus) {
        self.status = BatchStatus::Completed;
        self.exit_status = exit_status;
        self.end_time = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, message: String) {
        self.status = BatchStatus::Failed;
        self.exit_status = ExitStatus::failed();
        self.failures.push(message);
        self.end_time = Some(Utc::now());
    }

    /// The step that ended a flow with STOPPED is itself recorded as stopped,
    /// so a restart never treats it as complete.
    pub(crate) fn mark_stopped(&mut self, exit_status: ExitStatus) {
        self.status = BatchStatus::Stopped;
        self.exit_status = exit_status;
        self.end_time = Some(Utc::now());
    }
}

impl Entity for StepExecution {
    type Id = StepExecutionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
