pub mod agent;
pub mod dataset;
pub mod error;
pub mod evaluate;
pub mod tasks;

pub use agent::{Agent, AgentError, RetryPolicy};
pub use dataset::{Dataset, EvaluationConfig};
pub use error::EvaluationError;
pub use evaluate::compare::{
    ComparisonResults, MissingTask, TaskComparison, UnmatchedRecord, WorkflowComparison,
};
pub use evaluate::trace::TraceContextBuilder;
pub use evaluate::types::{RecordEvalSet, ResultSet};
pub use tasks::evaluator::{AssertionEvaluator, AssertionResult, FieldEvaluator};

// re-export the schema crate so downstream callers need a single dependency
pub use gavel_types as types;
