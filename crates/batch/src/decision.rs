//! Decisions: flow nodes that compute an exit status without touching data.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::execution::{ExitStatus, JobExecution, StepExecution};

/// Chooses the exit status a decision step reports.
///
/// Decisions only look at recorded state (parameters, earlier step outcomes,
/// external predicates); they are re-evaluated on every launch.
pub trait JobExecutionDecider: Send + Sync {
    fn decide(&self, execution: &JobExecution, previous: Option<&StepExecution>) -> ExitStatus;
}

impl<F> JobExecutionDecider for F
where
    F: Fn(&JobExecution, Option<&StepExecution>) -> ExitStatus + Send + Sync,
{
    fn decide(&self, execution: &JobExecution, previous: Option<&StepExecution>) -> ExitStatus {
        self(execution, previous)
    }
}

/// External approval predicate.
pub trait ApprovalCheck: Send + Sync {
    fn is_approved(&self, key: &str) -> bool;
}

/// Approval flags kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryApprovals {
    approved: RwLock<HashMap<String, bool>>,
}

impl InMemoryApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_approved(&self, key: impl Into<String>, approved: bool) {
        match self.approved.write() {
            Ok(mut map) => {
                map.insert(key.into(), approved);
            }
            Err(_) => warn!("approval store lock poisoned, approval not recorded"),
        }
    }

    pub fn reset(&self) {
        if let Ok(mut map) = self.approved.write() {
            map.clear();
        }
    }
}

impl ApprovalCheck for InMemoryApprovals {
    fn is_approved(&self, key: &str) -> bool {
        self.approved
            .read()
            .map(|map| map.get(key).copied().unwrap_or(false))
            .unwrap_or(false)
    }
}

impl<A: ApprovalCheck + ?Sized> ApprovalCheck for std::sync::Arc<A> {
    fn is_approved(&self, key: &str) -> bool {
        (**self).is_approved(key)
    }
}

/// Stops the job until the run identified by a parameter has been approved.
///
/// Returns STOPPED when the flag parameter is true and the key parameter's
/// value is not approved, COMPLETED otherwise.
pub struct ManualApprovalDecider<A> {
    approvals: A,
    flag_parameter: String,
    key_parameter: String,
}

impl<A: ApprovalCheck> ManualApprovalDecider<A> {
    pub const DEFAULT_FLAG_PARAMETER: &'static str = "manualApproval";

    pub fn new(approvals: A, key_parameter: impl Into<String>) -> Self {
        Self {
            approvals,
            flag_parameter: Self::DEFAULT_FLAG_PARAMETER.to_string(),
            key_parameter: key_parameter.into(),
        }
    }

    pub fn with_flag_parameter(mut self, name: impl Into<String>) -> Self {
        self.flag_parameter = name.into();
        self
    }
}

impl<A: ApprovalCheck> JobExecutionDecider for ManualApprovalDecider<A> {
    fn decide(&self, execution: &JobExecution, _previous: Option<&StepExecution>) -> ExitStatus {
        let params = &execution.parameters;
        if !params.get_bool(&self.flag_parameter).unwrap_or(false) {
            return ExitStatus::completed();
        }

        let key = params.get_string(&self.key_parameter).unwrap_or_default();
        let approved = self.approvals.is_approved(&key);
        debug!(
            job = %execution.job_name(),
            key = %key,
            approved,
            "manual approval checked"
        );

        if approved {
            ExitStatus::completed()
        } else {
            ExitStatus::stopped()
        }
    }
}
