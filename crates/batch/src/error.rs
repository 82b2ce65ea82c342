//! Error model for item processing and job launching.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use chunkflow_core::{DomainError, JobInstanceId};

use crate::repository::RepositoryError;

/// Classification of an [`ItemError`], used by skip and retry policies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input record.
    Parse,
    /// Transient processing failure (timeouts and the like).
    Transient,
    /// Processing failure that will not go away on retry.
    Permanent,
    /// Writing a chunk failed.
    Write,
    /// A reader or writer resource could not be opened or accessed.
    Resource,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Write => "write",
            ErrorKind::Resource => "resource",
        };
        f.write_str(name)
    }
}

/// Failure raised by a reader, processor, writer or tasklet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error(
        "parse error{}: {message} (input: {input:?})",
        .line.map(|l| format!(" at line {l}")).unwrap_or_default()
    )]
    Parse {
        line: Option<usize>,
        input: String,
        message: String,
    },

    #[error("transient processing error: {0}")]
    Transient(String),

    #[error("permanent processing error: {0}")]
    Permanent(String),

    /// `failed_items` holds indices into the written batch when the writer can
    /// attribute the failure to specific items; empty means the whole batch.
    #[error("write error: {message}")]
    Write {
        message: String,
        failed_items: Vec<usize>,
    },

    #[error("resource error: {0}")]
    Resource(String),
}

impl ItemError {
    pub fn parse(
        line: Option<usize>,
        input: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Parse {
            line,
            input: input.into(),
            message: message.into(),
        }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// A write failure affecting the whole batch.
    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write {
            message: msg.into(),
            failed_items: Vec::new(),
        }
    }

    /// A write failure attributed to the items at `failed_items`.
    pub fn write_items(msg: impl Into<String>, failed_items: Vec<usize>) -> Self {
        Self::Write {
            message: msg.into(),
            failed_items,
        }
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ItemError::Parse { .. } => ErrorKind::Parse,
            ItemError::Transient(_) => ErrorKind::Transient,
            ItemError::Permanent(_) => ErrorKind::Permanent,
            ItemError::Write { .. } => ErrorKind::Write,
            ItemError::Resource(_) => ErrorKind::Resource,
        }
    }
}

/// Errors returned to the caller of [`JobLauncher::run`](crate::JobLauncher::run).
///
/// Step failures and unresolved flow transitions are *not* launch errors: they
/// are recorded on the returned `JobExecution`, which ends FAILED.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("job instance {instance_id} of job '{job_name}' already has a running execution")]
    ConcurrentExecution {
        job_name: String,
        instance_id: JobInstanceId,
    },

    #[error("job instance {instance_id} of job '{job_name}' is already complete")]
    InstanceAlreadyComplete {
        job_name: String,
        instance_id: JobInstanceId,
    },

    #[error("job '{0}' is not restartable")]
    RestartPrevented(String),

    #[error("invalid job parameters: {0}")]
    InvalidParameters(#[from] DomainError),

    #[error("invalid flow definition: {0}")]
    InvalidFlow(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(ItemError::parse(Some(3), "x", "bad").kind(), ErrorKind::Parse);
        assert_eq!(ItemError::transient("t").kind(), ErrorKind::Transient);
        assert_eq!(ItemError::permanent("p").kind(), ErrorKind::Permanent);
        assert_eq!(ItemError::write("w").kind(), ErrorKind::Write);
        assert_eq!(ItemError::resource("r").kind(), ErrorKind::Resource);
    }

    #[test]
    fn parse_error_display_includes_line() {
        let err = ItemError::parse(Some(4), "a|b", "expected 3 fields");
        assert_eq!(
            err.to_string(),
            "parse error at line 4: expected 3 fields (input: \"a|b\")"
        );
        let err = ItemError::parse(None, "", "empty");
        assert_eq!(err.to_string(), "parse error: empty (input: \"\")");
    }
}
