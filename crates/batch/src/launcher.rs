//! Job launcher: resolves the instance, walks the flow and records every step.

use tracing::{error, info, warn};

use crate::error::BatchError;
use crate::execution::{BatchStatus, JobExecution, JobFailure, StepExecution};
use crate::flow::{EndStatus, FlowTarget, Resolution};
use crate::job::Job;
use crate::parameters::JobParameters;
use crate::repository::{JobRepository, RepositoryError};

/// Runs jobs against a repository.
///
/// A launcher can be shared between threads; each `run` executes one job
/// execution synchronously on the calling thread.
#[derive(Debug, Clone)]
pub struct JobLauncher<R: JobRepository> {
    repository: R,
}

impl<R: JobRepository> JobLauncher<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Launch (or restart) the instance of `job` identified by `parameters`.
    ///
    /// Returns the finished execution. A job that fails or stops is still
    /// `Ok`; `Err` means the execution could not be started or recorded.
    pub fn run(&self, job: &Job, parameters: JobParameters) -> Result<JobExecution, BatchError> {
        job.validate_parameters(&parameters)?;

        let mut execution = self
            .repository
            .create_job_execution(job.name(), &parameters, job.is_restartable())
            .map_err(|e| launch_error(job.name(), e))?;

        let attempt = self.repository.job_executions(execution.instance.id)?.len();
        info!(
            job = %job.name(),
            execution_id = %execution.id,
            instance_id = %execution.instance.id,
            attempt,
            "launching job"
        );

        execution.mark_started();
        self.repository.update_job_execution(&execution)?;
        for listener in job.listeners() {
            listener.before_job(&execution);
        }

        let (status, failure) = match self.walk(job, &mut execution) {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.abort(job, &mut execution, e)),
        };

        if status == BatchStatus::Stopped {
            execution.status = BatchStatus::Stopping;
            self.repository.update_job_execution(&execution)?;
        }
        execution.finish(status, failure);
        self.repository.update_job_execution(&execution)?;

        for listener in job.listeners() {
            listener.after_job(&execution);
        }

        match &execution.failure {
            Some(failure) => error!(
                job = %job.name(),
                execution_id = %execution.id,
                status = %execution.status,
                failure = %failure,
                "job finished"
            ),
            None => info!(
                job = %job.name(),
                execution_id = %execution.id,
                status = %execution.status,
                steps = execution.step_executions.len(),
                "job finished"
            ),
        }

        Ok(execution)
    }

    /// Record an execution whose walk was cut short as FAILED, so the
    /// instance does not look running forever and can be restarted.
    fn abort(&self, job: &Job, execution: &mut JobExecution, cause: BatchError) -> BatchError {
        execution.finish(
            BatchStatus::Failed,
            Some(JobFailure::Aborted {
                message: cause.to_string(),
            }),
        );
        if let Err(e) = self.repository.update_job_execution(execution) {
            warn!(
                job = %job.name(),
                execution_id = %execution.id,
                error = %e,
                "could not record aborted execution"
            );
        }
        error!(
            job = %job.name(),
            execution_id = %execution.id,
            error = %cause,
            "job aborted"
        );
        cause
    }

    fn walk(
        &self,
        job: &Job,
        execution: &mut JobExecution,
    ) -> Result<(BatchStatus, Option<JobFailure>), BatchError> {
        let mut current = job.flow().start().to_string();
        let mut previous: Option<StepExecution> = None;

        loop {
            let Some(step) = job.step(&current) else {
                return Ok((
                    BatchStatus::Failed,
                    Some(JobFailure::UnknownStep { step_name: current }),
                ));
            };

            let reusable = if step.always_runs() {
                None
            } else {
                self.repository
                    .last_step_execution(execution.instance.id, step.name())?
                    .filter(|prior| prior.is_complete() && prior.job_execution_id != execution.id)
            };

            let finished = match reusable {
                Some(prior) => {
                    info!(
                        job = %job.name(),
                        execution_id = %execution.id,
                        step = %step.name(),
                        exit_status = %prior.exit_status,
                        "step already complete, not re-executing"
                    );
                    prior
                }
                None => {
                    let mut step_execution = StepExecution::new(execution.id, step.name());
                    step_execution.mark_started();
                    self.repository.add_step_execution(&step_execution)?;

                    if let Some(exit_status) =
                        step.execute(execution, previous.as_ref(), &mut step_execution)
                    {
                        match job.flow().resolve(step.name(), &exit_status, false) {
                            Resolution::Next(FlowTarget::End(EndStatus::Stopped)) => {
                                step_execution.mark_stopped(exit_status)
                            }
                            _ => step_execution.mark_completed(exit_status),
                        }
                    }

                    self.repository.update_step_execution(&step_execution)?;
                    execution.step_executions.push(step_execution.clone());
                    step_execution
                }
            };

            let failed = finished.status == BatchStatus::Failed;
            match job.flow().resolve(step.name(), &finished.exit_status, failed) {
                Resolution::Next(FlowTarget::Step(next)) => {
                    current = next.clone();
                    previous = Some(finished);
                }
                Resolution::Next(FlowTarget::End(EndStatus::Completed)) | Resolution::Finished => {
                    return Ok((BatchStatus::Completed, None));
                }
                Resolution::Next(FlowTarget::End(EndStatus::Failed)) => {
                    return Ok((
                        BatchStatus::Failed,
                        Some(JobFailure::EndedFailed {
                            step_name: current,
                        }),
                    ));
                }
                Resolution::Next(FlowTarget::End(EndStatus::Stopped)) => {
                    info!(
                        job = %job.name(),
                        execution_id = %execution.id,
                        step = %current,
                        "flow stopped"
                    );
                    return Ok((BatchStatus::Stopped, None));
                }
                Resolution::StepFailed => {
                    let message = finished.failures.last().cloned().unwrap_or_default();
                    return Ok((
                        BatchStatus::Failed,
                        Some(JobFailure::StepFailed {
                            step_name: current,
                            message,
                        }),
                    ));
                }
                Resolution::Unmatched => {
                    warn!(
                        job = %job.name(),
                        step = %current,
                        exit_status = %finished.exit_status,
                        "no transition matches exit status"
                    );
                    return Ok((
                        BatchStatus::Failed,
                        Some(JobFailure::UnresolvedFlow {
                            step_name: current,
                            exit_code: finished.exit_status.code().to_string(),
                        }),
                    ));
                }
            }
        }
    }
}

fn launch_error(job_name: &str, error: RepositoryError) -> BatchError {
    match error {
        RepositoryError::ExecutionAlreadyRunning(instance_id) => BatchError::ConcurrentExecution {
            job_name: job_name.to_string(),
            instance_id,
        },
        RepositoryError::InstanceAlreadyComplete(instance_id) => {
            BatchError::InstanceAlreadyComplete {
                job_name: job_name.to_string(),
                instance_id,
            }
        }
        RepositoryError::RestartNotAllowed(_) => BatchError::RestartPrevented(job_name.to_string()),
        other => BatchError::Repository(other),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::decision::{InMemoryApprovals, ManualApprovalDecider};
    use crate::error::ItemError;
    use crate::execution::ExitStatus;
    use crate::parameters::DefaultJobParametersValidator;
    use crate::repository::InMemoryJobRepository;
    use crate::step::{RepeatStatus, Step};

    fn counting(name: &str, runs: Arc<AtomicUsize>) -> Step {
        Step::tasklet(name, move |_: &JobParameters, _: &mut StepExecution| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(RepeatStatus::Finished)
        })
    }

    fn params(file: &str) -> JobParameters {
        JobParameters::builder().add("filePath", file).build()
    }

    #[test]
    fn runs_all_steps_and_completes() {
        let runs = Arc::new(AtomicUsize::new(0));
        let job = Job::builder("job")
            .start(counting("a", runs.clone()))
            .next(counting("b", runs.clone()))
            .build()
            .unwrap();
        let launcher = JobLauncher::new(InMemoryJobRepository::new());

        let execution = launcher.run(&job, params("x")).unwrap();

        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.exit_status, ExitStatus::completed());
        assert_eq!(execution.step_names(), vec!["a", "b"]);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        let stored = launcher.repository().get_job_execution(execution.id).unwrap().unwrap();
        assert_eq!(stored, execution);
    }

    #[test]
    fn relaunching_a_completed_instance_is_rejected() {
        let job = Job::builder("job")
            .start(counting("a", Arc::default()))
            .build()
            .unwrap();
        let launcher = JobLauncher::new(InMemoryJobRepository::new());
        launcher.run(&job, params("x")).unwrap();

        let err = launcher.run(&job, params("x")).unwrap_err();
        assert!(matches!(err, BatchError::InstanceAlreadyComplete { .. }));
    }

    #[test]
    fn invalid_parameters_create_nothing() {
        let job = Job::builder("job")
            .validator(DefaultJobParametersValidator::new(["filePath"], ["manualApproval"]))
            .start(counting("a", Arc::default()))
            .build()
            .unwrap();
        let launcher = JobLauncher::new(InMemoryJobRepository::new());

        let err = launcher.run(&job, JobParameters::default()).unwrap_err();
        assert!(matches!(err, BatchError::InvalidParameters(_)));
        assert!(
            launcher
                .repository()
                .get_job_instance("job", &JobParameters::default())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn unmatched_exit_code_fails_the_job() {
        let job = Job::builder("job")
            .start(Step::tasklet("a", |_: &JobParameters, step: &mut StepExecution| {
                step.exit_status = ExitStatus::new("ODD");
                Ok(RepeatStatus::Finished)
            }))
            .on("COMPLETED")
            .end()
            .build()
            .unwrap();
        let launcher = JobLauncher::new(InMemoryJobRepository::new());

        let execution = launcher.run(&job, params("x")).unwrap();
        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(
            execution.failure,
            Some(JobFailure::UnresolvedFlow {
                step_name: "a".into(),
                exit_code: "ODD".into()
            })
        );
    }

    #[test]
    fn failed_step_follows_exact_failed_edge_only() {
        let failing = || {
            Step::tasklet("a", |_: &JobParameters, _: &mut StepExecution| {
                Err(ItemError::permanent("broken"))
            })
        };
        let launcher = JobLauncher::new(InMemoryJobRepository::new());

        let wildcard_only = Job::builder("wild")
            .start(failing())
            .next(counting("b", Arc::default()))
            .build()
            .unwrap();
        let execution = launcher.run(&wildcard_only, params("x")).unwrap();
        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(execution.step_names(), vec!["a"]);
        assert!(matches!(
            execution.failure,
            Some(JobFailure::StepFailed { ref step_name, ref message })
                if step_name == "a" && message == "permanent processing error: broken"
        ));

        let recovers = Job::builder("recovering")
            .start(failing())
            .on("FAILED")
            .to(counting("cleanup", Arc::default()))
            .build()
            .unwrap();
        let execution = launcher.run(&recovers, params("x")).unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.step_names(), vec!["a", "cleanup"]);
    }

    #[test]
    fn explicit_fail_end() {
        let job = Job::builder("job")
            .start(counting("a", Arc::default()))
            .on("*")
            .fail()
            .build()
            .unwrap();
        let execution = JobLauncher::new(InMemoryJobRepository::new())
            .run(&job, params("x"))
            .unwrap();
        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(
            execution.failure,
            Some(JobFailure::EndedFailed { step_name: "a".into() })
        );
    }

    #[test]
    fn stop_and_restart_skips_completed_steps() {
        let approvals = Arc::new(InMemoryApprovals::new());
        let load_runs = Arc::new(AtomicUsize::new(0));
        let send_runs = Arc::new(AtomicUsize::new(0));
        let job = Job::builder("job")
            .start(counting("load", load_runs.clone()))
            .next(Step::decision(
                "approval",
                ManualApprovalDecider::new(approvals.clone(), "filePath"),
            ))
            .on("STOPPED")
            .stop()
            .from("approval")
            .on("*")
            .to(counting("send", send_runs.clone()))
            .build()
            .unwrap();
        let launcher = JobLauncher::new(InMemoryJobRepository::arc());
        let params = JobParameters::builder()
            .add("filePath", "calls.txt")
            .add("manualApproval", true)
            .build();

        let first = launcher.run(&job, params.clone()).unwrap();
        assert_eq!(first.status, BatchStatus::Stopped);
        assert_eq!(first.exit_status, ExitStatus::stopped());
        assert_eq!(first.step_names(), vec!["load", "approval"]);
        assert_eq!(
            first.step_execution("approval").map(|s| s.status),
            Some(BatchStatus::Stopped)
        );

        let second = launcher.run(&job, params.clone()).unwrap();
        assert_eq!(second.status, BatchStatus::Stopped);
        assert_eq!(second.step_names(), vec!["approval"]);
        assert_eq!(second.instance.id, first.instance.id);

        approvals.set_approved("calls.txt", true);
        let third = launcher.run(&job, params).unwrap();
        assert_eq!(third.status, BatchStatus::Completed);
        assert_eq!(third.step_names(), vec!["approval", "send"]);

        assert_eq!(load_runs.load(Ordering::SeqCst), 1);
        assert_eq!(send_runs.load(Ordering::SeqCst), 1);
        let history = launcher.repository().job_executions(first.instance.id).unwrap();
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn allow_start_if_complete_reruns_step() {
        let setup_runs = Arc::new(AtomicUsize::new(0));
        let fail_once = Arc::new(AtomicBool::new(true));
        let flag = fail_once.clone();
        let job = Job::builder("job")
            .start(counting("setup", setup_runs.clone()).allow_start_if_complete(true))
            .next(Step::tasklet("work", move |_: &JobParameters, _: &mut StepExecution| {
                if flag.swap(false, Ordering::SeqCst) {
                    Err(ItemError::transient("flaky"))
                } else {
                    Ok(RepeatStatus::Finished)
                }
            }))
            .build()
            .unwrap();
        let launcher = JobLauncher::new(InMemoryJobRepository::new());

        assert_eq!(launcher.run(&job, params("x")).unwrap().status, BatchStatus::Failed);
        let restarted = launcher.run(&job, params("x")).unwrap();

        assert_eq!(restarted.status, BatchStatus::Completed);
        assert_eq!(restarted.step_names(), vec!["setup", "work"]);
        assert_eq!(setup_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn prevent_restart_rejects_second_launch() {
        let job = Job::builder("job")
            .prevent_restart()
            .start(Step::tasklet("a", |_: &JobParameters, _: &mut StepExecution| {
                Err(ItemError::permanent("nope"))
            }))
            .build()
            .unwrap();
        let launcher = JobLauncher::new(InMemoryJobRepository::new());

        assert_eq!(launcher.run(&job, params("x")).unwrap().status, BatchStatus::Failed);
        let err = launcher.run(&job, params("x")).unwrap_err();
        assert!(matches!(err, BatchError::RestartPrevented(name) if name == "job"));
    }
}
