pub mod error;
pub mod eval;
pub mod loader;
pub mod prompt;
pub mod record;
pub mod suite;
pub mod trace;

pub use error::{SuiteError, TypeError};
pub use eval::{
    AssertionTask, ComparisonOperator, EvaluationTask, EvaluationTaskType, LLMJudgeTask,
    TaskResult, TaskStatus, TraceAssertionTask, ValueExt,
};
pub use loader::{
    load_task_from_file, load_task_from_string, load_tasks_from_file, load_tasks_from_string,
    TaskFileFormat,
};
pub use prompt::{BoundPrompt, Prompt};
pub use record::EvalRecord;
pub use suite::{ExecutionNode, ExecutionPlan, TaskSuite};
pub use trace::{AggregationType, Span, SpanFilter, SpanStatus, TraceAssertion};
