//! Steps: the nodes of a job's flow.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{error, info};

use crate::chunk::ChunkProcessor;
use crate::config::BatchConfig;
use crate::decision::JobExecutionDecider;
use crate::error::{BatchError, ItemError};
use crate::execution::{ExitStatus, JobExecution, StepExecution};
use crate::item::{Processor, Reader, Writer};
use crate::listener::SkipListener;
use crate::parameters::JobParameters;
use crate::policy::{NeverSkipPolicy, RetryPolicy, SkipPolicy};

/// Builds a fresh reader for each step execution.
pub type ReaderFactory<T> =
    Box<dyn Fn(&JobParameters) -> Result<Box<dyn Reader<T>>, ItemError> + Send + Sync>;

/// A chunk step with its item types erased.
pub trait ChunkTask: Send + Sync {
    fn run(&self, parameters: &JobParameters, step: &mut StepExecution) -> Result<(), ItemError>;
}

/// Whether a tasklet wants to be called again.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RepeatStatus {
    Finished,
    Continuable,
}

/// A single unit of work that is not item oriented.
///
/// Each call is one commit. A tasklet may set `step.exit_status` to steer the
/// flow; otherwise the step exits COMPLETED.
pub trait Tasklet: Send + Sync {
    fn execute(
        &self,
        parameters: &JobParameters,
        step: &mut StepExecution,
    ) -> Result<RepeatStatus, ItemError>;
}

impl<F> Tasklet for F
where
    F: Fn(&JobParameters, &mut StepExecution) -> Result<RepeatStatus, ItemError> + Send + Sync,
{
    fn execute(
        &self,
        parameters: &JobParameters,
        step: &mut StepExecution,
    ) -> Result<RepeatStatus, ItemError> {
        self(parameters, step)
    }
}

/// What a step does.
pub enum StepKind {
    Chunk(Box<dyn ChunkTask>),
    Tasklet(Box<dyn Tasklet>),
    Decision(Box<dyn JobExecutionDecider>),
}

impl StepKind {
    fn label(&self) -> &'static str {
        match self {
            StepKind::Chunk(_) => "chunk",
            StepKind::Tasklet(_) => "tasklet",
            StepKind::Decision(_) => "decision",
        }
    }
}

/// A named node in a job's flow.
pub struct Step {
    name: String,
    kind: StepKind,
    allow_start_if_complete: bool,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field("allow_start_if_complete", &self.allow_start_if_complete)
            .finish()
    }
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            allow_start_if_complete: false,
        }
    }

    /// Start building a chunk step reading `T` and writing `R`.
    pub fn chunk<T, R>(name: impl Into<String>) -> ChunkStepBuilder<T, R> {
        ChunkStepBuilder::new(name)
    }

    pub fn tasklet(name: impl Into<String>, tasklet: impl Tasklet + 'static) -> Self {
        Self::new(name, StepKind::Tasklet(Box::new(tasklet)))
    }

    pub fn decision(name: impl Into<String>, decider: impl JobExecutionDecider + 'static) -> Self {
        Self::new(name, StepKind::Decision(Box::new(decider)))
    }

    /// Run this step again on restart even if it completed before.
    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn is_decision(&self) -> bool {
        matches!(self.kind, StepKind::Decision(_))
    }

    /// Whether a restart must execute this step despite a completed record.
    pub fn always_runs(&self) -> bool {
        self.allow_start_if_complete || self.is_decision()
    }

    /// Run the step's work into `step`, which the caller has already started.
    ///
    /// On success the exit status is returned and `step` keeps its running
    /// status: the caller finalizes it once, as COMPLETED or as STOPPED when
    /// the flow stops on this step. Failures are recorded on `step` (marked
    /// FAILED) and yield `None`.
    pub fn execute(
        &self,
        job: &JobExecution,
        previous: Option<&StepExecution>,
        step: &mut StepExecution,
    ) -> Option<ExitStatus> {
        info!(
            job = %job.job_name(),
            execution_id = %job.id,
            step = %self.name,
            kind = self.kind.label(),
            "step starting"
        );

        let result = match &self.kind {
            StepKind::Chunk(task) => {
                task.run(&job.parameters, step).map(|()| ExitStatus::completed())
            }
            StepKind::Tasklet(tasklet) => run_tasklet(tasklet.as_ref(), &job.parameters, step),
            StepKind::Decision(decider) => Ok(decider.decide(job, previous)),
        };

        match result {
            Ok(exit_status) => {
                info!(
                    job = %job.job_name(),
                    step = %self.name,
                    exit_status = %exit_status,
                    read = step.read_count,
                    written = step.write_count,
                    filtered = step.filter_count,
                    skipped = step.skip_count(),
                    commits = step.commit_count,
                    "step work done"
                );
                Some(exit_status)
            }
            Err(e) => {
                step.mark_failed(e.to_string());
                error!(
                    job = %job.job_name(),
                    step = %self.name,
                    error = %e,
                    rollbacks = step.rollback_count,
                    "step failed"
                );
                None
            }
        }
    }
}

fn run_tasklet(
    tasklet: &dyn Tasklet,
    parameters: &JobParameters,
    step: &mut StepExecution,
) -> Result<ExitStatus, ItemError> {
    loop {
        let repeat = tasklet.execute(parameters, step);
        match repeat {
            Ok(repeat) => {
                step.commit_count += 1;
                if repeat == RepeatStatus::Finished {
                    break;
                }
            }
            Err(e) => {
                step.rollback_count += 1;
                return Err(e);
            }
        }
    }

    if step.exit_status.code() == ExitStatus::EXECUTING {
        Ok(ExitStatus::completed())
    } else {
        Ok(step.exit_status.clone())
    }
}

struct ChunkStep<T, R> {
    reader_factory: ReaderFactory<T>,
    processor: Arc<dyn Processor<T, R>>,
    writer: Arc<dyn Writer<R>>,
    chunk_size: usize,
    skip_policy: Arc<dyn SkipPolicy>,
    retry_policy: RetryPolicy,
    listeners: Vec<Arc<dyn SkipListener<T, R>>>,
}

impl<T, R> ChunkTask for ChunkStep<T, R> {
    fn run(&self, parameters: &JobParameters, step: &mut StepExecution) -> Result<(), ItemError> {
        let mut reader = (self.reader_factory)(parameters)?;
        ChunkProcessor::new(
            reader.as_mut(),
            self.processor.as_ref(),
            self.writer.as_ref(),
            self.chunk_size,
            self.skip_policy.as_ref(),
            &self.retry_policy,
        )
        .with_listeners(&self.listeners)
        .run(step)
    }
}

/// Builder for chunk steps.
pub struct ChunkStepBuilder<T, R> {
    name: String,
    reader_factory: Option<ReaderFactory<T>>,
    processor: Option<Arc<dyn Processor<T, R>>>,
    writer: Option<Arc<dyn Writer<R>>>,
    chunk_size: usize,
    skip_policy: Arc<dyn SkipPolicy>,
    retry_policy: RetryPolicy,
    listeners: Vec<Arc<dyn SkipListener<T, R>>>,
    allow_start_if_complete: bool,
    _types: PhantomData<fn(T) -> R>,
}

impl<T, R> ChunkStepBuilder<T, R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reader_factory: None,
            processor: None,
            writer: None,
            chunk_size: BatchConfig::DEFAULT_CHUNK_SIZE,
            skip_policy: Arc::new(NeverSkipPolicy),
            retry_policy: RetryPolicy::no_retry(),
            listeners: Vec::new(),
            allow_start_if_complete: false,
            _types: PhantomData,
        }
    }

    /// Take chunk size and default policies from `config`.
    pub fn config(mut self, config: &BatchConfig) -> Self {
        self.chunk_size = config.chunk_size;
        self.skip_policy = Arc::new(config.skip_policy());
        self.retry_policy = config.retry_policy();
        self
    }

    /// Reader built from the job parameters when the step starts.
    pub fn reader<F, Rd>(mut self, factory: F) -> Self
    where
        F: Fn(&JobParameters) -> Result<Rd, ItemError> + Send + Sync + 'static,
        Rd: Reader<T> + 'static,
    {
        self.reader_factory = Some(Box::new(move |params: &JobParameters| {
            factory(params).map(|reader| Box::new(reader) as Box<dyn Reader<T>>)
        }));
        self
    }

    pub fn processor(mut self, processor: impl Processor<T, R> + 'static) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    pub fn writer(mut self, writer: impl Writer<R> + 'static) -> Self {
        self.writer = Some(Arc::new(writer));
        self
    }

    /// Share a writer with other steps or with the caller.
    pub fn shared_writer(mut self, writer: Arc<dyn Writer<R>>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn skip_policy(mut self, policy: impl SkipPolicy + 'static) -> Self {
        self.skip_policy = Arc::new(policy);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn listener(mut self, listener: impl SkipListener<T, R> + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }
}

impl<T: 'static, R: 'static> ChunkStepBuilder<T, R> {
    pub fn build(self) -> Result<Step, BatchError> {
        let missing = |part: &str| {
            BatchError::InvalidFlow(format!("chunk step '{}' has no {part}", self.name))
        };

        if self.chunk_size == 0 {
            return Err(BatchError::InvalidFlow(format!(
                "chunk step '{}' has a chunk size of 0",
                self.name
            )));
        }
        let reader_factory = self.reader_factory.ok_or_else(|| missing("reader"))?;
        let processor = self.processor.ok_or_else(|| missing("processor"))?;
        let writer = self.writer.ok_or_else(|| missing("writer"))?;

        let task = ChunkStep {
            reader_factory,
            processor,
            writer,
            chunk_size: self.chunk_size,
            skip_policy: self.skip_policy,
            retry_policy: self.retry_policy,
            listeners: self.listeners,
        };

        Ok(Step::new(self.name, StepKind::Chunk(Box::new(task)))
            .allow_start_if_complete(self.allow_start_if_complete))
    }
}
