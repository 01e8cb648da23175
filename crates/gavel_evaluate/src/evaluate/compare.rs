use crate::error::EvaluationError;
use crate::evaluate::types::{RecordEvalSet, ResultSet};
use gavel_types::{TaskResult, TaskStatus};
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tabled::{settings::Style, Table, Tabled};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskComparison {
    pub task_id: String,
    pub record_id: String,
    pub baseline_passed: bool,
    pub candidate_passed: bool,
    pub status_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingTask {
    pub task_id: String,
    pub record_id: String,
    pub present_in: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmatchedRecord {
    pub record_id: String,
    pub present_in: String,
}

/// One matched record compared across two runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowComparison {
    pub record_id: String,
    pub baseline_pass_rate: f64,
    pub candidate_pass_rate: f64,
    pub pass_rate_delta: f64,
    pub is_regression: bool,
    pub is_improvement: bool,
    pub task_comparisons: Vec<TaskComparison>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResults {
    pub workflow_comparisons: Vec<WorkflowComparison>,

    /// Matched workflows (present and successful in both runs).
    pub total_workflows: usize,

    pub improved_workflows: usize,

    pub regressed_workflows: usize,

    pub unchanged_workflows: usize,

    /// Arithmetic mean of per-workflow deltas across matched workflows.
    pub mean_pass_rate_delta: f64,

    pub task_status_changes: Vec<TaskComparison>,

    pub missing_tasks: Vec<MissingTask>,

    /// Records present in only one run; excluded from aggregates.
    pub unmatched_records: Vec<UnmatchedRecord>,

    pub baseline_workflow_count: usize,

    pub candidate_workflow_count: usize,

    pub regressed: bool,
}

impl ComparisonResults {
    pub fn has_missing_tasks(&self) -> bool {
        !self.missing_tasks.is_empty()
    }

    pub fn as_table(&self) {
        self.print_summary_table();

        if !self.task_status_changes.is_empty() {
            println!("\n{}", "Task Status Changes".truecolor(245, 77, 85).bold());
            self.print_status_changes_table();
        }

        if self.has_missing_tasks() {
            self.print_missing_tasks();
        }
    }

    fn print_summary_table(&self) {
        let entries: Vec<_> = self
            .workflow_comparisons
            .iter()
            .map(|wc| WorkflowComparisonEntry {
                record_id: wc.record_id.clone(),
                baseline_pass_rate: format!("{:.2}%", wc.baseline_pass_rate * 100.0),
                candidate_pass_rate: format!("{:.2}%", wc.candidate_pass_rate * 100.0),
                delta: format!("{:+.2}%", wc.pass_rate_delta * 100.0),
                status: if wc.is_regression {
                    "Regressed".to_string()
                } else if wc.is_improvement {
                    "Improved".to_string()
                } else {
                    "Unchanged".to_string()
                },
            })
            .collect();

        let mut table = Table::new(entries);
        table.with(Style::sharp());
        println!("{table}");
    }

    fn print_status_changes_table(&self) {
        let entries: Vec<_> = self
            .task_status_changes
            .iter()
            .map(|tc| TaskStatusChangeEntry {
                task_id: tc.task_id.clone(),
                record_id: tc.record_id.clone(),
                change: match (tc.baseline_passed, tc.candidate_passed) {
                    (true, false) => "Pass → Fail",
                    (false, true) => "Fail → Pass",
                    _ => "No Change",
                }
                .to_string(),
            })
            .collect();

        let mut table = Table::new(entries);
        table.with(Style::sharp());
        println!("{table}");
    }

    fn print_missing_tasks(&self) {
        println!("\n{}", "⚠ Missing Tasks".yellow().bold());

        let baseline_only: Vec<_> = self
            .missing_tasks
            .iter()
            .filter(|t| t.present_in == "baseline_only")
            .collect();

        let candidate_only: Vec<_> = self
            .missing_tasks
            .iter()
            .filter(|t| t.present_in == "candidate_only")
            .collect();

        if !baseline_only.is_empty() {
            println!("  Baseline only ({} tasks):", baseline_only.len());
            for task in baseline_only {
                println!("    - {} ({})", task.task_id, task.record_id);
            }
        }

        if !candidate_only.is_empty() {
            println!("  Candidate only ({} tasks):", candidate_only.len());
            for task in candidate_only {
                println!("    - {} ({})", task.task_id, task.record_id);
            }
        }
    }
}

#[derive(Tabled)]
struct WorkflowComparisonEntry {
    #[tabled(rename = "Record")]
    record_id: String,
    #[tabled(rename = "Baseline Pass Rate")]
    baseline_pass_rate: String,
    #[tabled(rename = "Candidate Pass Rate")]
    candidate_pass_rate: String,
    #[tabled(rename = "Delta")]
    delta: String,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Tabled)]
struct TaskStatusChangeEntry {
    #[tabled(rename = "Task ID")]
    task_id: String,
    #[tabled(rename = "Record")]
    record_id: String,
    #[tabled(rename = "Change")]
    change: String,
}

/// Tasks that count toward a workflow's pass rate: evaluated (not skipped)
/// and not condition gates.
fn evaluable_tasks(record: &RecordEvalSet) -> HashMap<&str, &TaskResult> {
    record
        .results
        .iter()
        .filter(|task| !task.condition && task.status != TaskStatus::Skipped)
        .map(|task| (task.task_id.as_str(), task))
        .collect()
}

/// Compare two result sets, matching workflows by record id.
///
/// For each matched record the pass rate on both sides is computed over the
/// task ids evaluable in both runs, and `delta = candidate - baseline`. A
/// workflow is improved when `delta > regression_threshold`, regressed when
/// `delta < -regression_threshold`, unchanged otherwise. Records present in
/// only one run are reported but excluded from aggregates.
pub fn compare_results(
    baseline: &ResultSet,
    candidate: &ResultSet,
    regression_threshold: f64,
) -> Result<ComparisonResults, EvaluationError> {
    if regression_threshold < 0.0 {
        return Err(EvaluationError::InvalidRegressionThreshold(
            regression_threshold,
        ));
    }

    let baseline_map: HashMap<&str, &RecordEvalSet> = baseline
        .records
        .iter()
        .filter(|r| r.success())
        .map(|r| (r.record_id.as_str(), r))
        .collect();

    let candidate_map: HashMap<&str, &RecordEvalSet> = candidate
        .records
        .iter()
        .filter(|r| r.success())
        .map(|r| (r.record_id.as_str(), r))
        .collect();

    let mut workflow_comparisons = Vec::new();
    let mut task_status_changes = Vec::new();
    let mut missing_tasks = Vec::new();
    let mut unmatched_records = Vec::new();

    for baseline_record in baseline.records.iter().filter(|r| r.success()) {
        let record_id = baseline_record.record_id.as_str();

        let candidate_record = match candidate_map.get(record_id) {
            Some(record) => *record,
            None => {
                unmatched_records.push(UnmatchedRecord {
                    record_id: record_id.to_string(),
                    present_in: "baseline_only".to_string(),
                });
                continue;
            }
        };

        let baseline_tasks = evaluable_tasks(baseline_record);
        let candidate_tasks = evaluable_tasks(candidate_record);
        let candidate_present: std::collections::HashSet<&str> = candidate_record
            .results
            .iter()
            .map(|t| t.task_id.as_str())
            .collect();
        let baseline_present: std::collections::HashSet<&str> = baseline_record
            .results
            .iter()
            .map(|t| t.task_id.as_str())
            .collect();

        let mut comparisons = Vec::new();
        let mut baseline_passed = 0;
        let mut candidate_passed = 0;
        let mut total_matched = 0;

        for task in baseline_record.results.iter() {
            let task_id = task.task_id.as_str();

            if !candidate_present.contains(task_id) {
                missing_tasks.push(MissingTask {
                    task_id: task_id.to_string(),
                    record_id: record_id.to_string(),
                    present_in: "baseline_only".to_string(),
                });
                continue;
            }

            let Some(baseline_task) = baseline_tasks.get(task_id) else {
                continue;
            };

            if let Some(candidate_task) = candidate_tasks.get(task_id) {
                let status_changed = baseline_task.is_passed() != candidate_task.is_passed();

                if baseline_task.is_passed() {
                    baseline_passed += 1;
                }
                if candidate_task.is_passed() {
                    candidate_passed += 1;
                }
                total_matched += 1;

                let comparison = TaskComparison {
                    task_id: task_id.to_string(),
                    record_id: record_id.to_string(),
                    baseline_passed: baseline_task.is_passed(),
                    candidate_passed: candidate_task.is_passed(),
                    status_changed,
                };

                if status_changed {
                    task_status_changes.push(comparison.clone());
                }
                comparisons.push(comparison);
            }
        }

        for task in candidate_record.results.iter() {
            let task_id = task.task_id.as_str();
            if !baseline_present.contains(task_id) {
                missing_tasks.push(MissingTask {
                    task_id: task_id.to_string(),
                    record_id: record_id.to_string(),
                    present_in: "candidate_only".to_string(),
                });
            }
        }

        let baseline_pass_rate = if total_matched > 0 {
            baseline_passed as f64 / total_matched as f64
        } else {
            0.0
        };

        let candidate_pass_rate = if total_matched > 0 {
            candidate_passed as f64 / total_matched as f64
        } else {
            0.0
        };

        let pass_rate_delta = candidate_pass_rate - baseline_pass_rate;

        workflow_comparisons.push(WorkflowComparison {
            record_id: record_id.to_string(),
            baseline_pass_rate,
            candidate_pass_rate,
            pass_rate_delta,
            is_regression: pass_rate_delta < -regression_threshold,
            is_improvement: pass_rate_delta > regression_threshold,
            task_comparisons: comparisons,
        });
    }

    for candidate_record in candidate.records.iter().filter(|r| r.success()) {
        if !baseline_map.contains_key(candidate_record.record_id.as_str()) {
            unmatched_records.push(UnmatchedRecord {
                record_id: candidate_record.record_id.clone(),
                present_in: "candidate_only".to_string(),
            });
        }
    }

    let (improved, regressed, unchanged) =
        workflow_comparisons
            .iter()
            .fold((0, 0, 0), |(i, r, u), wc| {
                if wc.is_regression {
                    (i, r + 1, u)
                } else if wc.is_improvement {
                    (i + 1, r, u)
                } else {
                    (i, r, u + 1)
                }
            });

    let mean_delta = if !workflow_comparisons.is_empty() {
        workflow_comparisons
            .iter()
            .map(|wc| wc.pass_rate_delta)
            .sum::<f64>()
            / workflow_comparisons.len() as f64
    } else {
        0.0
    };

    Ok(ComparisonResults {
        total_workflows: workflow_comparisons.len(),
        improved_workflows: improved,
        regressed_workflows: regressed,
        unchanged_workflows: unchanged,
        mean_pass_rate_delta: mean_delta,
        workflow_comparisons,
        task_status_changes,
        missing_tasks,
        unmatched_records,
        baseline_workflow_count: baseline.records.len(),
        candidate_workflow_count: candidate.records.len(),
        regressed: regressed > 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;
    use gavel_types::{ComparisonOperator, EvaluationTaskType};
    use serde_json::json;

    fn task(task_id: &str, status: TaskStatus) -> TaskResult {
        TaskResult {
            created_at: Utc::now(),
            task_id: task_id.to_string(),
            task_type: EvaluationTaskType::Assertion,
            status,
            actual: Some(json!(1)),
            expected: json!(1),
            field_path: None,
            operator: ComparisonOperator::Equals,
            condition: false,
            error: None,
            stage: 0,
        }
    }

    fn record(id: &str, statuses: &[(&str, TaskStatus)]) -> RecordEvalSet {
        RecordEvalSet::from_results(
            id.to_string(),
            statuses.iter().map(|(tid, s)| task(tid, *s)).collect(),
            1,
        )
    }

    fn result_set(records: Vec<RecordEvalSet>) -> ResultSet {
        ResultSet::new(records)
    }

    #[test]
    fn test_comparing_to_self_is_neutral() {
        let set = result_set(vec![
            record("r1", &[("a", TaskStatus::Passed), ("b", TaskStatus::Failed)]),
            record("r2", &[("a", TaskStatus::Passed), ("b", TaskStatus::Passed)]),
        ]);

        let comparison = compare_results(&set, &set, 0.05).unwrap();
        assert_eq!(comparison.improved_workflows, 0);
        assert_eq!(comparison.regressed_workflows, 0);
        assert_eq!(comparison.unchanged_workflows, 2);
        assert_relative_eq!(comparison.mean_pass_rate_delta, 0.0);
        assert!(!comparison.regressed);
    }

    #[test]
    fn test_improvement_past_threshold() {
        // baseline 0.60, candidate 0.80, threshold 0.05 => improved
        let baseline = result_set(vec![record(
            "r1",
            &[
                ("a", TaskStatus::Passed),
                ("b", TaskStatus::Passed),
                ("c", TaskStatus::Passed),
                ("d", TaskStatus::Failed),
                ("e", TaskStatus::Failed),
            ],
        )]);
        let candidate = result_set(vec![record(
            "r1",
            &[
                ("a", TaskStatus::Passed),
                ("b", TaskStatus::Passed),
                ("c", TaskStatus::Passed),
                ("d", TaskStatus::Passed),
                ("e", TaskStatus::Failed),
            ],
        )]);

        let comparison = compare_results(&baseline, &candidate, 0.05).unwrap();
        assert_eq!(comparison.improved_workflows, 1);
        assert_relative_eq!(comparison.mean_pass_rate_delta, 0.2);

        let workflow = &comparison.workflow_comparisons[0];
        assert_relative_eq!(workflow.baseline_pass_rate, 0.6);
        assert_relative_eq!(workflow.candidate_pass_rate, 0.8);
        assert!(workflow.is_improvement);
        assert!(!workflow.is_regression);
    }

    #[test]
    fn test_regression_detection_with_zero_threshold() {
        let baseline = result_set(vec![record(
            "r1",
            &[("a", TaskStatus::Passed), ("b", TaskStatus::Passed)],
        )]);
        let candidate = result_set(vec![record(
            "r1",
            &[("a", TaskStatus::Passed), ("b", TaskStatus::Failed)],
        )]);

        let comparison = compare_results(&baseline, &candidate, 0.0).unwrap();
        assert_eq!(comparison.regressed_workflows, 1);
        assert!(comparison.regressed);
        assert_eq!(comparison.task_status_changes.len(), 1);
        assert_eq!(comparison.task_status_changes[0].task_id, "b");
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let set = result_set(vec![record("r1", &[("a", TaskStatus::Passed)])]);
        let err = compare_results(&set, &set, -0.1).unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::InvalidRegressionThreshold(_)
        ));
    }

    #[test]
    fn test_unmatched_records_reported_but_excluded() {
        let baseline = result_set(vec![
            record("shared", &[("a", TaskStatus::Passed)]),
            record("old_only", &[("a", TaskStatus::Passed)]),
        ]);
        let candidate = result_set(vec![
            record("shared", &[("a", TaskStatus::Passed)]),
            record("new_only", &[("a", TaskStatus::Failed)]),
        ]);

        let comparison = compare_results(&baseline, &candidate, 0.05).unwrap();
        assert_eq!(comparison.total_workflows, 1);
        assert_eq!(comparison.unmatched_records.len(), 2);

        let sides: Vec<_> = comparison
            .unmatched_records
            .iter()
            .map(|u| (u.record_id.as_str(), u.present_in.as_str()))
            .collect();
        assert!(sides.contains(&("old_only", "baseline_only")));
        assert!(sides.contains(&("new_only", "candidate_only")));
    }

    #[test]
    fn test_skipped_tasks_excluded_from_rates() {
        let baseline = result_set(vec![record(
            "r1",
            &[("a", TaskStatus::Passed), ("b", TaskStatus::Skipped)],
        )]);
        let candidate = result_set(vec![record(
            "r1",
            &[("a", TaskStatus::Passed), ("b", TaskStatus::Passed)],
        )]);

        let comparison = compare_results(&baseline, &candidate, 0.0).unwrap();
        let workflow = &comparison.workflow_comparisons[0];

        // only "a" is evaluable on both sides
        assert_relative_eq!(workflow.baseline_pass_rate, 1.0);
        assert_relative_eq!(workflow.candidate_pass_rate, 1.0);
        assert_eq!(workflow.task_comparisons.len(), 1);
    }

    #[test]
    fn test_missing_tasks_reported() {
        let baseline = result_set(vec![record(
            "r1",
            &[("a", TaskStatus::Passed), ("removed", TaskStatus::Passed)],
        )]);
        let candidate = result_set(vec![record(
            "r1",
            &[("a", TaskStatus::Passed), ("added", TaskStatus::Passed)],
        )]);

        let comparison = compare_results(&baseline, &candidate, 0.0).unwrap();
        assert!(comparison.has_missing_tasks());

        let entries: Vec<_> = comparison
            .missing_tasks
            .iter()
            .map(|m| (m.task_id.as_str(), m.present_in.as_str()))
            .collect();
        assert!(entries.contains(&("removed", "baseline_only")));
        assert!(entries.contains(&("added", "candidate_only")));
    }
}
