//! # SurveyStats Core Library
//!
//! Shared library providing the dataset model, task definitions, and the
//! aggregation functions for the SurveyStats job server.
//!
//! ## Features
//!
//! - **Dataset**: CSV ingestion and the immutable question/state index
//! - **Tasks**: Task kinds, submission validation, and typed requests
//! - **Aggregation**: Pure per-task functions with ordered, structured results
//! - **Errors**: One error type shared across ingestion, dispatch, and execution
//!
//! ## Architecture
//!
//! The library is independent of any transport. The HTTP service builds the
//! index once at startup, then hands `TaskRequest` values to worker tasks
//! that call [`aggregation::execute`] and serialize the returned
//! [`TaskOutput`](aggregation::TaskOutput).

pub mod aggregation;
pub mod dataset;
pub mod error;
pub mod question;
pub mod record;
pub mod task;

// Re-export commonly used types
pub use aggregation::{CategoryKey, GroupKey, TaskOutput};
pub use dataset::{DatasetIndex, IngestStats, StateRecords};
pub use error::{StatsError, StatsResult, SHUTDOWN_MESSAGE};
pub use question::{QuestionClassification, QuestionName, StateName};
pub use record::Record;
pub use task::{TaskKind, TaskRequest, TaskSubmission};

/// Version information for SurveyStats
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
