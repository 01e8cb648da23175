use crate::error::SuiteError;
use crate::eval::EvaluationTask;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskFileFormat {
    Yaml,
    Json,
}

impl FromStr for TaskFileFormat {
    type Err = SuiteError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(TaskFileFormat::Yaml),
            "json" => Ok(TaskFileFormat::Json),
            other => Err(SuiteError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Plural task files are either a bare sequence of tasks or wrapped in a
/// top-level `tasks` key.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskDocument {
    Wrapped { tasks: Vec<EvaluationTask> },
    Bare(Vec<EvaluationTask>),
}

impl TaskDocument {
    fn into_tasks(self) -> Vec<EvaluationTask> {
        match self {
            TaskDocument::Wrapped { tasks } => tasks,
            TaskDocument::Bare(tasks) => tasks,
        }
    }
}

/// Parse a single task definition from a string.
pub fn load_task_from_string(
    content: &str,
    format: TaskFileFormat,
) -> Result<EvaluationTask, SuiteError> {
    let mut task: EvaluationTask = match format {
        TaskFileFormat::Yaml => serde_yaml::from_str(content)
            .map_err(|e| SuiteError::MalformedTaskFile(e.to_string()))?,
        TaskFileFormat::Json => serde_json::from_str(content)
            .map_err(|e| SuiteError::MalformedTaskFile(e.to_string()))?,
    };

    task.normalize_ids();
    Ok(task)
}

/// Parse a list of task definitions from a string.
pub fn load_tasks_from_string(
    content: &str,
    format: TaskFileFormat,
) -> Result<Vec<EvaluationTask>, SuiteError> {
    let document: TaskDocument = match format {
        TaskFileFormat::Yaml => serde_yaml::from_str(content)
            .map_err(|e| SuiteError::MalformedTaskFile(e.to_string()))?,
        TaskFileFormat::Json => serde_json::from_str(content)
            .map_err(|e| SuiteError::MalformedTaskFile(e.to_string()))?,
    };

    let mut tasks = document.into_tasks();
    for task in tasks.iter_mut() {
        task.normalize_ids();
    }

    Ok(tasks)
}

/// Load one task from a file, inferring the format from the extension when
/// no hint is given.
pub fn load_task_from_file(
    path: impl AsRef<Path>,
    format: Option<TaskFileFormat>,
) -> Result<EvaluationTask, SuiteError> {
    let path = path.as_ref();
    let format = resolve_format(path, format)?;
    let content = std::fs::read_to_string(path)?;

    debug!(path = %path.display(), "Loading task definition");
    load_task_from_string(&content, format)
}

/// Load a list of tasks from a file, inferring the format from the extension
/// when no hint is given.
pub fn load_tasks_from_file(
    path: impl AsRef<Path>,
    format: Option<TaskFileFormat>,
) -> Result<Vec<EvaluationTask>, SuiteError> {
    let path = path.as_ref();
    let format = resolve_format(path, format)?;
    let content = std::fs::read_to_string(path)?;

    debug!(path = %path.display(), "Loading task definitions");
    load_tasks_from_string(&content, format)
}

fn resolve_format(
    path: &Path,
    format: Option<TaskFileFormat>,
) -> Result<TaskFileFormat, SuiteError> {
    if let Some(format) = format {
        return Ok(format);
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();

    TaskFileFormat::from_str(extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{ComparisonOperator, EvaluationTaskType};
    use std::io::Write;

    const YAML_TASKS: &str = r#"
tasks:
  - task_type: Assertion
    id: Age-Check
    field_path: age
    operator: GreaterThan
    expected_value: 18
  - task_type: TraceAssertion
    id: retry_count
    assertion:
      SpanCount:
        filter:
          ByName:
            name: retry
    operator: LessThanOrEqual
    expected_value: 3
    depends_on: [age-check]
"#;

    const JSON_TASK: &str = r#"{
        "task_type": "LLMJudge",
        "id": "relevance",
        "prompt": {"template": "Score the relevance of ${response}"},
        "field_path": "score",
        "operator": "GreaterThanOrEqual",
        "expected_value": 4,
        "max_retries": 2
    }"#;

    #[test]
    fn test_load_tasks_from_yaml_string() {
        let tasks = load_tasks_from_string(YAML_TASKS, TaskFileFormat::Yaml).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id(), "age-check");
        assert_eq!(tasks[0].task_type(), EvaluationTaskType::Assertion);
        assert_eq!(*tasks[0].operator(), ComparisonOperator::GreaterThan);
        assert_eq!(tasks[1].task_type(), EvaluationTaskType::TraceAssertion);
        assert_eq!(tasks[1].depends_on(), ["age-check"]);
    }

    #[test]
    fn test_load_bare_sequence() {
        let bare = r#"
- task_type: Assertion
  id: a
  field_path: x
  operator: Equals
  expected_value: 1
"#;
        let tasks = load_tasks_from_string(bare, TaskFileFormat::Yaml).unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_load_single_task_from_json() {
        let task = load_task_from_string(JSON_TASK, TaskFileFormat::Json).unwrap();
        assert_eq!(task.id(), "relevance");
        assert_eq!(task.task_type(), EvaluationTaskType::LLMJudge);
    }

    #[test]
    fn test_format_hints() {
        assert_eq!("yaml".parse::<TaskFileFormat>().unwrap(), TaskFileFormat::Yaml);
        assert_eq!("JSON".parse::<TaskFileFormat>().unwrap(), TaskFileFormat::Json);
        assert!("toml".parse::<TaskFileFormat>().is_err());
    }

    #[test]
    fn test_malformed_file_is_a_schema_error() {
        let result = load_tasks_from_string("tasks: {not: a list}", TaskFileFormat::Yaml);
        assert!(matches!(result, Err(SuiteError::MalformedTaskFile(_))));
    }

    #[test]
    fn test_load_tasks_from_file_with_extension_inference() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML_TASKS.as_bytes()).unwrap();

        let tasks = load_tasks_from_file(file.path(), None).unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn test_unknown_task_type_rejected() {
        let result = load_task_from_string(
            r#"{"task_type": "HumanReview", "id": "x"}"#,
            TaskFileFormat::Json,
        );
        assert!(matches!(result, Err(SuiteError::MalformedTaskFile(_))));
    }
}
