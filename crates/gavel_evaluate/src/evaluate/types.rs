use crate::error::EvaluationError;
use crate::evaluate::compare::{compare_results, ComparisonResults};
use chrono::{DateTime, Utc};
use gavel_types::{TaskResult, TaskStatus};
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tabled::{
    settings::{object::Rows, Alignment, Color, Format, Style},
    Table, Tabled,
};

/// One record's full task outcome set (a "workflow" when compared across
/// runs). Task results are ordered by execution stage, then declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEvalSet {
    pub record_id: String,

    pub created_at: DateTime<Utc>,

    pub results: Vec<TaskResult>,

    /// Evaluable tasks: passed + failed. Skipped tasks and condition gates
    /// are excluded.
    pub total_tasks: usize,

    pub passed_tasks: usize,

    pub failed_tasks: usize,

    pub skipped_tasks: usize,

    pub pass_rate: f64,

    pub duration_ms: i64,

    /// Record-level failure (the whole workflow could not run).
    pub error: Option<String>,
}

impl RecordEvalSet {
    pub fn from_results(
        record_id: String,
        results: Vec<TaskResult>,
        duration_ms: i64,
    ) -> Self {
        let mut passed = 0;
        let mut failed = 0;
        let mut skipped = 0;

        for result in &results {
            match result.status {
                TaskStatus::Skipped => skipped += 1,
                // gates close branches; they never count toward the workflow
                TaskStatus::Passed if !result.condition => passed += 1,
                TaskStatus::Failed if !result.condition => failed += 1,
                _ => {}
            }
        }

        let evaluable = passed + failed;
        Self {
            record_id,
            created_at: Utc::now(),
            results,
            total_tasks: evaluable,
            passed_tasks: passed,
            failed_tasks: failed,
            skipped_tasks: skipped,
            pass_rate: if evaluable == 0 {
                0.0
            } else {
                passed as f64 / evaluable as f64
            },
            duration_ms,
            error: None,
        }
    }

    pub fn from_failure(record_id: String, error: String) -> Self {
        Self {
            record_id,
            created_at: Utc::now(),
            results: Vec::new(),
            total_tasks: 0,
            passed_tasks: 0,
            failed_tasks: 0,
            skipped_tasks: 0,
            pass_rate: 0.0,
            duration_ms: 0,
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.task_id == task_id)
    }
}

/// Per-record, per-task outcomes for one evaluation run, in original record
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub records: Vec<RecordEvalSet>,

    #[serde(skip)]
    index: BTreeMap<String, usize>,
}

impl ResultSet {
    pub fn new(records: Vec<RecordEvalSet>) -> Self {
        let index = records
            .iter()
            .enumerate()
            .map(|(idx, record)| (record.record_id.clone(), idx))
            .collect();

        Self { records, index }
    }

    pub fn record(&self, record_id: &str) -> Result<&RecordEvalSet, EvaluationError> {
        self.index
            .get(record_id)
            .and_then(|&idx| self.records.get(idx))
            .ok_or_else(|| EvaluationError::MissingKeyError(record_id.to_string()))
    }

    pub fn successful_count(&self) -> usize {
        self.records.iter().filter(|r| r.success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.records.iter().filter(|r| !r.success()).count()
    }

    /// Compare this run (candidate) against a baseline run, matching
    /// workflows by record id.
    pub fn compare_to(
        &self,
        baseline: &ResultSet,
        regression_threshold: f64,
    ) -> Result<ComparisonResults, EvaluationError> {
        compare_results(baseline, self, regression_threshold)
    }

    pub fn to_json(&self) -> Result<String, EvaluationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, EvaluationError> {
        let mut result_set: ResultSet = serde_json::from_str(json)?;
        result_set.index = result_set
            .records
            .iter()
            .enumerate()
            .map(|(idx, record)| (record.record_id.clone(), idx))
            .collect();
        Ok(result_set)
    }

    /// Flat export for reporting: one map per record/task pair, workflow
    /// metadata repeated on every row.
    pub fn to_flat_records(&self) -> Vec<BTreeMap<String, Value>> {
        let mut rows = Vec::new();

        for record in &self.records {
            for task in &record.results {
                let mut flat = BTreeMap::new();

                flat.insert(
                    "created_at".to_string(),
                    Value::String(record.created_at.to_rfc3339()),
                );
                flat.insert(
                    "record_id".to_string(),
                    Value::String(record.record_id.clone()),
                );
                flat.insert("success".to_string(), Value::Bool(record.success()));
                flat.insert(
                    "workflow_error".to_string(),
                    Value::String(record.error.clone().unwrap_or_default()),
                );
                flat.insert(
                    "workflow_total_tasks".to_string(),
                    record.total_tasks.into(),
                );
                flat.insert(
                    "workflow_passed_tasks".to_string(),
                    record.passed_tasks.into(),
                );
                flat.insert(
                    "workflow_failed_tasks".to_string(),
                    record.failed_tasks.into(),
                );
                flat.insert("workflow_pass_rate".to_string(), record.pass_rate.into());
                flat.insert(
                    "workflow_duration_ms".to_string(),
                    record.duration_ms.into(),
                );

                flat.insert("task_id".to_string(), Value::String(task.task_id.clone()));
                flat.insert(
                    "task_type".to_string(),
                    Value::String(task.task_type.to_string()),
                );
                flat.insert(
                    "task_status".to_string(),
                    Value::String(task.status.to_string()),
                );
                flat.insert("task_value".to_string(), task.metric_value().into());
                flat.insert(
                    "task_field_path".to_string(),
                    task.field_path
                        .clone()
                        .map(Value::String)
                        .unwrap_or(Value::Null),
                );
                flat.insert(
                    "task_operator".to_string(),
                    Value::String(task.operator.to_string()),
                );
                flat.insert("task_expected".to_string(), task.expected.clone());
                flat.insert(
                    "task_actual".to_string(),
                    task.actual.clone().unwrap_or(Value::Null),
                );
                flat.insert(
                    "task_message".to_string(),
                    task.error
                        .clone()
                        .map(Value::String)
                        .unwrap_or(Value::Null),
                );

                rows.push(flat);
            }
        }

        rows
    }

    /// Display results as a table in the console.
    /// # Arguments
    /// * `show_tasks` - If true, display detailed task results; otherwise, show workflow summary
    pub fn as_table(&self, show_tasks: bool) {
        if show_tasks {
            println!("\n{}", "Task Details".truecolor(245, 77, 85).bold());
            println!("{}", self.build_tasks_table());
        } else {
            println!("\n{}", "Workflow Summary".truecolor(245, 77, 85).bold());
            println!("{}", self.build_workflow_table());
        }
    }

    fn build_workflow_table(&self) -> Table {
        let entries: Vec<WorkflowTableEntry> = self
            .records
            .iter()
            .map(|record| WorkflowTableEntry {
                record_id: record.record_id.clone(),
                total: record.total_tasks.to_string(),
                passed: record.passed_tasks.to_string(),
                failed: record.failed_tasks.to_string(),
                skipped: record.skipped_tasks.to_string(),
                pass_rate: format!("{:.2}%", record.pass_rate * 100.0),
                duration: format!("{} ms", record.duration_ms),
            })
            .collect();

        Self::style_table(Table::new(entries))
    }

    fn build_tasks_table(&self) -> Table {
        let entries: Vec<TaskTableEntry> = self
            .records
            .iter()
            .flat_map(|record| {
                record.results.iter().map(|task| TaskTableEntry {
                    record_id: record.record_id.clone(),
                    task_id: task.task_id.clone(),
                    task_type: task.task_type.to_string(),
                    status: task.status.to_string(),
                    stage: (task.stage + 1).to_string(),
                    message: task.error.clone().unwrap_or_default(),
                })
            })
            .collect();

        Self::style_table(Table::new(entries))
    }

    fn style_table(mut table: Table) -> Table {
        table.with(Style::sharp());
        table.modify(
            Rows::new(0..1),
            (
                Format::content(|s: &str| s.truecolor(245, 77, 85).bold().to_string()),
                Alignment::center(),
                Color::BOLD,
            ),
        );
        table
    }
}

#[derive(Tabled)]
struct WorkflowTableEntry {
    #[tabled(rename = "Record")]
    record_id: String,
    #[tabled(rename = "Tasks")]
    total: String,
    #[tabled(rename = "Passed")]
    passed: String,
    #[tabled(rename = "Failed")]
    failed: String,
    #[tabled(rename = "Skipped")]
    skipped: String,
    #[tabled(rename = "Pass Rate")]
    pass_rate: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

#[derive(Tabled)]
struct TaskTableEntry {
    #[tabled(rename = "Record")]
    record_id: String,
    #[tabled(rename = "Task ID")]
    task_id: String,
    #[tabled(rename = "Type")]
    task_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_types::{ComparisonOperator, EvaluationTaskType};
    use serde_json::json;

    fn task_result(task_id: &str, status: TaskStatus, condition: bool) -> TaskResult {
        TaskResult {
            created_at: Utc::now(),
            task_id: task_id.to_string(),
            task_type: EvaluationTaskType::Assertion,
            status,
            actual: Some(json!(1)),
            expected: json!(1),
            field_path: Some("field".to_string()),
            operator: ComparisonOperator::Equals,
            condition,
            error: None,
            stage: 0,
        }
    }

    #[test]
    fn test_counters_exclude_skipped_and_gates() {
        let set = RecordEvalSet::from_results(
            "r1".to_string(),
            vec![
                task_result("a", TaskStatus::Passed, false),
                task_result("gate", TaskStatus::Failed, true),
                task_result("b", TaskStatus::Failed, false),
                task_result("c", TaskStatus::Skipped, false),
            ],
            5,
        );

        assert_eq!(set.total_tasks, 2);
        assert_eq!(set.passed_tasks, 1);
        assert_eq!(set.failed_tasks, 1);
        assert_eq!(set.skipped_tasks, 1);
        assert_eq!(set.pass_rate, 0.5);
    }

    #[test]
    fn test_result_set_lookup() {
        let set = ResultSet::new(vec![
            RecordEvalSet::from_results("a".to_string(), vec![], 0),
            RecordEvalSet::from_results("b".to_string(), vec![], 0),
        ]);

        assert_eq!(set.record("b").unwrap().record_id, "b");
        assert!(set.record("ghost").is_err());
    }

    #[test]
    fn test_json_round_trip_restores_index() {
        let set = ResultSet::new(vec![RecordEvalSet::from_results(
            "r1".to_string(),
            vec![task_result("a", TaskStatus::Passed, false)],
            3,
        )]);

        let json = set.to_json().unwrap();
        let restored = ResultSet::from_json(&json).unwrap();

        assert_eq!(restored.records.len(), 1);
        assert_eq!(restored.record("r1").unwrap().passed_tasks, 1);
    }

    #[test]
    fn test_flat_export_shape() {
        let set = ResultSet::new(vec![RecordEvalSet::from_results(
            "r1".to_string(),
            vec![
                task_result("a", TaskStatus::Passed, false),
                task_result("b", TaskStatus::Failed, false),
            ],
            3,
        )]);

        let rows = set.to_flat_records();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["record_id"], json!("r1"));
        assert_eq!(rows[0]["task_value"], json!(1.0));
        assert_eq!(rows[1]["task_value"], json!(0.0));
        assert_eq!(rows[0]["workflow_pass_rate"], json!(0.5));
    }
}
