//! `chunkflow-batch`: a batch job engine.
//!
//! A [`Job`] is a flow of [`Step`]s. Chunk steps read items, process them and
//! write them in fixed-size chunks with skip and retry policies; decision steps
//! pick the next transition and can stop the job until a later launch. The
//! [`JobLauncher`] records every execution in a [`JobRepository`] and, on
//! restart, does not re-run steps that already completed.
//!
//! ```no_run
//! use chunkflow_batch::item::{ListReader, NoopWriter, PassThroughProcessor};
//! use chunkflow_batch::{InMemoryJobRepository, Job, JobLauncher, JobParameters, Step};
//!
//! let load = Step::chunk::<u32, u32>("load")
//!     .reader(|_: &JobParameters| Ok(ListReader::new(0..10)))
//!     .processor(PassThroughProcessor)
//!     .writer(NoopWriter)
//!     .build()?;
//! let job = Job::builder("example").start(load).build()?;
//!
//! let launcher = JobLauncher::new(InMemoryJobRepository::new());
//! let execution = launcher.run(&job, JobParameters::builder().add("run", 1_i64).build())?;
//! println!("{}", execution.status);
//! # Ok::<(), chunkflow_batch::BatchError>(())
//! ```

pub mod chunk;
pub mod config;
pub mod decision;
pub mod error;
pub mod execution;
pub mod flow;
pub mod item;
pub mod job;
pub mod launcher;
pub mod listener;
pub mod parameters;
pub mod policy;
pub mod repository;
pub mod step;

pub use chunk::{ChunkContribution, ChunkOutcome, ChunkProcessor, ChunkState};
pub use config::{BatchConfig, ConfigError};
pub use decision::{ApprovalCheck, InMemoryApprovals, JobExecutionDecider, ManualApprovalDecider};
pub use error::{BatchError, ErrorKind, ItemError};
pub use execution::{BatchStatus, ExitStatus, JobExecution, JobFailure, JobInstance, StepExecution};
pub use flow::{EndStatus, ExitPattern, FlowGraph, FlowTarget};
pub use job::{Job, JobBuilder, TransitionBuilder};
pub use launcher::JobLauncher;
pub use listener::{JobListener, LoggingListener, SkipListener};
pub use parameters::{
    DefaultJobParametersValidator, JobParameter, JobParameters, JobParametersBuilder,
    JobParametersValidator, ParameterValue,
};
pub use policy::{
    AlwaysSkipPolicy, BackoffStrategy, LimitCheckingSkipPolicy, NeverSkipPolicy, RetryPolicy,
    SkipPolicy,
};
pub use repository::{InMemoryJobRepository, JobRepository, RepositoryError};
pub use step::{ChunkStepBuilder, ChunkTask, RepeatStatus, Step, StepKind, Tasklet};
