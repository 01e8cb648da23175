use crate::agent::AgentError;
use thiserror::Error;

/// Per-task evaluation failures. Everything here is contained to one task of
/// one record: the executor records the message on a `Failed` result and
/// keeps going.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Field '{0}' not found")]
    FieldNotFound(String),

    #[error("Index {0} not found")]
    IndexNotFound(usize),

    #[error("Invalid array index: {0}")]
    InvalidArrayIndex(String),

    #[error("Empty field path provided")]
    EmptyFieldPath,

    #[error("Cannot compare non-numeric values")]
    CannotCompareNonNumericValues,

    #[error("Contains operation requires string or list")]
    InvalidContainsOperation,

    #[error("StartsWith operation requires strings")]
    InvalidStartsWithOperation,

    #[error("EndsWith operation requires strings")]
    InvalidEndsWithOperation,

    #[error("Regex match requires strings")]
    InvalidRegexOperation,

    #[error("Cannot get length: {0}")]
    CannotGetLength(String),

    #[error("Expected value for length must be an integer")]
    ExpectedLengthMustBeInteger,

    #[error("Invalid range format - expected [min, max] array")]
    InvalidRangeFormat,

    #[error("Expected value for a type predicate must be a boolean")]
    ExpectedBooleanOutcome,

    #[error("Invalid sequence matches operation - both values must be booleans")]
    InvalidSequenceMatchesOperation,

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("No span matched the filter")]
    NoMatchingSpan,

    #[error("Filter matched {0} spans where exactly one was expected")]
    AmbiguousSpanMatch(usize),

    #[error("Attribute '{0}' not found in span")]
    AttributeNotFound(String),

    #[error("Attribute '{0}' is not numeric and cannot be aggregated")]
    NonNumericAggregation(String),

    #[error("Trace data has no spans")]
    NoSpans,

    #[error("Trace data has no root span")]
    NoRootSpan,

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Record '{0}' not found in results")]
    MissingKeyError(String),

    #[error("No results found in evaluation results")]
    NoResultsFound,

    #[error("Suite contains LLM judge tasks but no agent was configured")]
    MissingAgent,

    #[error("Regression threshold must be non-negative, got {0}")]
    InvalidRegressionThreshold(f64),

    #[error(transparent)]
    AgentError(#[from] AgentError),

    #[error(transparent)]
    TypeError(#[from] gavel_types::TypeError),

    #[error(transparent)]
    SuiteError(#[from] gavel_types::SuiteError),

    #[error(transparent)]
    RegexError(#[from] regex::Error),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),

    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}
