use crate::prompt::Prompt;
use crate::trace::TraceAssertion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::Display;

/// Comparison operators applied to a resolved actual value and an expected
/// value. Ordering operators are numeric-only; length checks use the
/// dedicated `HasLength*` operators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Matches,
    HasLengthGreaterThan,
    HasLengthGreaterThanOrEqual,
    HasLengthEqual,
    InRange,
    IsEmail,
    IsNumeric,
    IsString,
    IsNotEmpty,
    SequenceMatches,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
pub enum EvaluationTaskType {
    Assertion,
    LLMJudge,
    TraceAssertion,
}

/// Outcome of one task for one record. `Skipped` is the designed result of a
/// closed condition gate or an upstream failure, never an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
pub enum TaskStatus {
    Passed,
    Failed,
    Skipped,
}

fn default_max_retries() -> u32 {
    3
}

/// Deterministic check of a field in the record context (or in an upstream
/// task's output) against an expected value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssertionTask {
    pub id: String,

    pub field_path: String,

    pub operator: ComparisonOperator,

    pub expected_value: Value,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub condition: bool,
}

impl AssertionTask {
    pub fn new(
        id: &str,
        field_path: &str,
        operator: ComparisonOperator,
        expected_value: Value,
    ) -> Self {
        Self {
            id: id.to_lowercase(),
            field_path: field_path.to_string(),
            operator,
            expected_value,
            description: None,
            depends_on: Vec::new(),
            condition: false,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Mark this task as a gate: a failure skips dependents instead of
    /// counting against the workflow.
    pub fn as_condition(mut self) -> Self {
        self.condition = true;
        self
    }
}

/// Check that requires an external agent call. The prompt is bound against
/// the record context, the structured response is merged into the record's
/// addressable context under the task id, and `field_path` is then evaluated
/// inside that response with the same comparison logic as assertions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LLMJudgeTask {
    pub id: String,

    pub prompt: Prompt,

    pub field_path: String,

    pub operator: ComparisonOperator,

    pub expected_value: Value,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub condition: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl LLMJudgeTask {
    pub fn new(
        id: &str,
        prompt: Prompt,
        field_path: &str,
        operator: ComparisonOperator,
        expected_value: Value,
    ) -> Self {
        Self {
            id: id.to_lowercase(),
            prompt,
            field_path: field_path.to_string(),
            operator,
            expected_value,
            description: None,
            depends_on: Vec::new(),
            condition: false,
            max_retries: default_max_retries(),
        }
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn as_condition(mut self) -> Self {
        self.condition = true;
        self
    }
}

/// Check over a record's trace spans. The assertion itself produces the
/// actual value; the shared operator/expected pair then judges it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceAssertionTask {
    pub id: String,

    pub assertion: TraceAssertion,

    pub operator: ComparisonOperator,

    pub expected_value: Value,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub condition: bool,
}

impl TraceAssertionTask {
    pub fn new(
        id: &str,
        assertion: TraceAssertion,
        operator: ComparisonOperator,
        expected_value: Value,
    ) -> Self {
        Self {
            id: id.to_lowercase(),
            assertion,
            operator,
            expected_value,
            description: None,
            depends_on: Vec::new(),
            condition: false,
        }
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn as_condition(mut self) -> Self {
        self.condition = true;
        self
    }
}

/// One declared check, tagged by `task_type` in task files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "task_type")]
pub enum EvaluationTask {
    Assertion(AssertionTask),
    LLMJudge(LLMJudgeTask),
    TraceAssertion(TraceAssertionTask),
}

impl EvaluationTask {
    pub fn task_type(&self) -> EvaluationTaskType {
        match self {
            EvaluationTask::Assertion(_) => EvaluationTaskType::Assertion,
            EvaluationTask::LLMJudge(_) => EvaluationTaskType::LLMJudge,
            EvaluationTask::TraceAssertion(_) => EvaluationTaskType::TraceAssertion,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EvaluationTask::Assertion(t) => &t.id,
            EvaluationTask::LLMJudge(t) => &t.id,
            EvaluationTask::TraceAssertion(t) => &t.id,
        }
    }

    pub fn field_path(&self) -> Option<&str> {
        match self {
            EvaluationTask::Assertion(t) => Some(&t.field_path),
            EvaluationTask::LLMJudge(t) => Some(&t.field_path),
            EvaluationTask::TraceAssertion(_) => None,
        }
    }

    pub fn operator(&self) -> &ComparisonOperator {
        match self {
            EvaluationTask::Assertion(t) => &t.operator,
            EvaluationTask::LLMJudge(t) => &t.operator,
            EvaluationTask::TraceAssertion(t) => &t.operator,
        }
    }

    pub fn expected_value(&self) -> &Value {
        match self {
            EvaluationTask::Assertion(t) => &t.expected_value,
            EvaluationTask::LLMJudge(t) => &t.expected_value,
            EvaluationTask::TraceAssertion(t) => &t.expected_value,
        }
    }

    pub fn depends_on(&self) -> &[String] {
        match self {
            EvaluationTask::Assertion(t) => &t.depends_on,
            EvaluationTask::LLMJudge(t) => &t.depends_on,
            EvaluationTask::TraceAssertion(t) => &t.depends_on,
        }
    }

    pub fn condition(&self) -> bool {
        match self {
            EvaluationTask::Assertion(t) => t.condition,
            EvaluationTask::LLMJudge(t) => t.condition,
            EvaluationTask::TraceAssertion(t) => t.condition,
        }
    }

    /// Task ids are matched case-insensitively; suites normalize both the id
    /// and every dependency reference at construction.
    pub(crate) fn normalize_ids(&mut self) {
        let (id, deps) = match self {
            EvaluationTask::Assertion(t) => (&mut t.id, &mut t.depends_on),
            EvaluationTask::LLMJudge(t) => (&mut t.id, &mut t.depends_on),
            EvaluationTask::TraceAssertion(t) => (&mut t.id, &mut t.depends_on),
        };
        *id = id.to_lowercase();
        for dep in deps.iter_mut() {
            *dep = dep.to_lowercase();
        }
    }
}

/// Per-record, per-task outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub created_at: DateTime<Utc>,

    pub task_id: String,

    pub task_type: EvaluationTaskType,

    pub status: TaskStatus,

    /// Resolved actual value; `None` when the task was skipped or resolution
    /// itself failed.
    pub actual: Option<Value>,

    pub expected: Value,

    pub field_path: Option<String>,

    pub operator: ComparisonOperator,

    pub condition: bool,

    /// Explanatory message for failed tasks.
    pub error: Option<String>,

    /// Stage index in the execution plan.
    pub stage: usize,
}

impl TaskResult {
    pub fn is_passed(&self) -> bool {
        self.status == TaskStatus::Passed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == TaskStatus::Skipped
    }

    /// Metric value for flat exports (1.0 pass, 0.0 otherwise).
    pub fn metric_value(&self) -> f64 {
        if self.is_passed() {
            1.0
        } else {
            0.0
        }
    }
}

pub trait ValueExt {
    /// Length for strings, arrays and objects.
    fn to_length(&self) -> Option<i64>;

    /// Numeric view of the value, if it is a number.
    fn as_numeric(&self) -> Option<f64>;

    /// Non-null and non-empty for collections and strings.
    fn is_not_empty(&self) -> bool;
}

impl ValueExt for Value {
    fn to_length(&self) -> Option<i64> {
        match self {
            Value::Array(arr) => Some(arr.len() as i64),
            Value::String(s) => Some(s.chars().count() as i64),
            Value::Object(obj) => Some(obj.len() as i64),
            _ => None,
        }
    }

    fn as_numeric(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    fn is_not_empty(&self) -> bool {
        match self {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            Value::Array(arr) => !arr.is_empty(),
            Value::Object(obj) => !obj.is_empty(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_ids_normalized_to_lowercase() {
        let task = AssertionTask::new("Check-Age", "age", ComparisonOperator::GreaterThan, json!(18));
        assert_eq!(task.id, "check-age");
    }

    #[test]
    fn test_tagged_task_round_trip() {
        let task = EvaluationTask::Assertion(
            AssertionTask::new("age", "age", ComparisonOperator::GreaterThan, json!(18))
                .with_depends_on(vec!["gate".to_string()]),
        );

        let serialized = serde_json::to_value(&task).unwrap();
        assert_eq!(serialized["task_type"], json!("Assertion"));

        let round_tripped: EvaluationTask = serde_json::from_value(serialized).unwrap();
        assert_eq!(round_tripped, task);
    }

    #[test]
    fn test_judge_defaults() {
        let raw = json!({
            "task_type": "LLMJudge",
            "id": "tone",
            "prompt": {"template": "Rate the tone of ${response}"},
            "field_path": "score",
            "operator": "GreaterThanOrEqual",
            "expected_value": 4
        });

        let task: EvaluationTask = serde_json::from_value(raw).unwrap();
        match task {
            EvaluationTask::LLMJudge(judge) => {
                assert_eq!(judge.max_retries, 3);
                assert!(!judge.condition);
                assert!(judge.depends_on.is_empty());
            }
            _ => panic!("expected LLMJudge variant"),
        }
    }

    #[test]
    fn test_value_ext_lengths() {
        assert_eq!(json!([1, 2, 3]).to_length(), Some(3));
        assert_eq!(json!("héllo").to_length(), Some(5));
        assert_eq!(json!({"a": 1}).to_length(), Some(1));
        assert_eq!(json!(42).to_length(), None);
    }

    #[test]
    fn test_value_ext_is_not_empty() {
        assert!(!json!(null).is_not_empty());
        assert!(!json!("").is_not_empty());
        assert!(!json!([]).is_not_empty());
        assert!(json!(0).is_not_empty());
        assert!(json!("x").is_not_empty());
    }
}
