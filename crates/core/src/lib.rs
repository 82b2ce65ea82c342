//! `chunkflow-core`: identity and error building blocks shared by the batch engine.
//!
//! This crate contains **pure** primitives (no execution or storage concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{JobExecutionId, JobInstanceId, StepExecutionId};
pub use value_object::ValueObject;
