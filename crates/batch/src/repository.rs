//! Job repository: the record of instances, executions and step executions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chunkflow_core::{Entity, JobExecutionId, JobInstanceId, StepExecutionId};

use crate::execution::{BatchStatus, JobExecution, JobInstance, StepExecution};
use crate::parameters::JobParameters;

/// Storage for batch metadata.
///
/// `create_job_execution` is the launch gate: resolving the instance, the
/// running-execution check and inserting the new execution happen as one
/// atomic operation.
pub trait JobRepository: Send + Sync {
    /// Resolve (or create) the instance for `job_name` + the identifying
    /// parameters and register a new STARTING execution for it.
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution, RepositoryError>;

    /// Replace the stored execution record.
    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError>;

    /// Attach a new step execution to its job execution.
    fn add_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError>;

    fn update_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError>;

    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, RepositoryError>;

    fn get_job_execution(
        &self,
        id: JobExecutionId,
    ) -> Result<Option<JobExecution>, RepositoryError>;

    /// All executions of an instance, oldest first.
    fn job_executions(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Vec<JobExecution>, RepositoryError>;

    fn last_job_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError>;

    /// Most recent step execution named `step_name` across every execution of
    /// the instance.
    fn last_step_execution(
        &self,
        instance_id: JobInstanceId,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError>;

    /// Forget everything.
    fn reset(&self) -> Result<(), RepositoryError>;
}

/// Repository error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("job execution not found: {0}")]
    ExecutionNotFound(JobExecutionId),
    #[error("step execution not found: {0}")]
    StepExecutionNotFound(StepExecutionId),
    #[error("job instance {0} already has a running execution")]
    ExecutionAlreadyRunning(JobInstanceId),
    #[error("job instance {0} is already complete")]
    InstanceAlreadyComplete(JobInstanceId),
    #[error("job instance {0} has prior executions and its job is not restartable")]
    RestartNotAllowed(JobInstanceId),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Default)]
struct Records {
    instances: HashMap<(String, String), JobInstance>,
    executions: HashMap<JobExecutionId, JobExecution>,
    /// Execution ids per instance in creation order.
    by_instance: HashMap<JobInstanceId, Vec<JobExecutionId>>,
}

impl Records {
    fn executions_of(
        &self,
        instance_id: JobInstanceId,
    ) -> impl DoubleEndedIterator<Item = &JobExecution> {
        self.by_instance
            .get(&instance_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.executions.get(id))
    }
}

/// In-memory repository for tests, dev and single-process use.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    records: RwLock<Records>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Records>, RepositoryError> {
        self.records
            .read()
            .map_err(|_| RepositoryError::Storage("repository lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Records>, RepositoryError> {
        self.records
            .write()
            .map_err(|_| RepositoryError::Storage("repository lock poisoned".to_string()))
    }
}

impl JobRepository for InMemoryJobRepository {
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution, RepositoryError> {
        let mut records = self.write()?;
        let key = (job_name.to_string(), parameters.job_key());

        let instance = match records.instances.get(&key) {
            Some(existing) => existing.clone(),
            None => {
                let instance = JobInstance::new(job_name, key.1.clone());
                records.instances.insert(key, instance.clone());
                instance
            }
        };

        let prior: Vec<&JobExecution> = records.executions_of(instance.id).collect();
        if !prior.is_empty() {
            if prior.iter().any(|e| e.status.is_running()) {
                return Err(RepositoryError::ExecutionAlreadyRunning(instance.id));
            }
            if prior.last().is_some_and(|e| e.status == BatchStatus::Completed) {
                return Err(RepositoryError::InstanceAlreadyComplete(instance.id));
            }
            if !restartable {
                return Err(RepositoryError::RestartNotAllowed(instance.id));
            }
        }

        let execution = JobExecution::new(instance.clone(), parameters.clone());
        records
            .by_instance
            .entry(instance.id)
            .or_default()
            .push(execution.id);
        records.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        let mut records = self.write()?;
        let stored = records
            .executions
            .get_mut(execution.id())
            .ok_or(RepositoryError::ExecutionNotFound(execution.id))?;
        *stored = execution.clone();
        Ok(())
    }

    fn add_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        let mut records = self.write()?;
        let execution = records
            .executions
            .get_mut(&step.job_execution_id)
            .ok_or(RepositoryError::ExecutionNotFound(step.job_execution_id))?;
        execution.step_executions.push(step.clone());
        Ok(())
    }

    fn update_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        let mut records = self.write()?;
        let execution = records
            .executions
            .get_mut(&step.job_execution_id)
            .ok_or(RepositoryError::ExecutionNotFound(step.job_execution_id))?;
        let stored = execution
            .step_executions
            .iter_mut()
            .find(|s| s.same_entity(step))
            .ok_or(RepositoryError::StepExecutionNotFound(step.id))?;
        *stored = step.clone();
        Ok(())
    }

    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        let records = self.read()?;
        let key = (job_name.to_string(), parameters.job_key());
        Ok(records.instances.get(&key).cloned())
    }

    fn get_job_execution(
        &self,
        id: JobExecutionId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        let records = self.read()?;
        Ok(records.executions.get(&id).cloned())
    }

    fn job_executions(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Vec<JobExecution>, RepositoryError> {
        let records = self.read()?;
        Ok(records.executions_of(instance_id).cloned().collect())
    }

    fn last_job_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        let records = self.read()?;
        Ok(records.executions_of(instance_id).next_back().cloned())
    }

    fn last_step_execution(
        &self,
        instance_id: JobInstanceId,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError> {
        let records = self.read()?;
        Ok(records
            .executions_of(instance_id)
            .rev()
            .find_map(|e| e.step_executions.iter().rev().find(|s| s.step_name == step_name))
            .cloned())
    }

    fn reset(&self) -> Result<(), RepositoryError> {
        let mut records = self.write()?;
        *records = Records::default();
        Ok(())
    }
}

impl<R: JobRepository + ?Sized> JobRepository for Arc<R> {
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution, RepositoryError> {
        (**self).create_job_execution(job_name, parameters, restartable)
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        (**self).update_job_execution(execution)
    }

    fn add_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        (**self).add_step_execution(step)
    }

    fn update_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        (**self).update_step_execution(step)
    }

    fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        (**self).get_job_instance(job_name, parameters)
    }

    fn get_job_execution(
        &self,
        id: JobExecutionId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        (**self).get_job_execution(id)
    }

    fn job_executions(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Vec<JobExecution>, RepositoryError> {
        (**self).job_executions(instance_id)
    }

    fn last_job_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        (**self).last_job_execution(instance_id)
    }

    fn last_step_execution(
        &self,
        instance_id: JobInstanceId,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError> {
        (**self).last_step_execution(instance_id, step_name)
    }

    fn reset(&self) -> Result<(), RepositoryError> {
        (**self).reset()
    }
}
