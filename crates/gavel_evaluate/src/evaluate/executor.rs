use crate::agent::{call_with_retry, Agent, RetryPolicy};
use crate::error::EvaluationError;
use crate::evaluate::trace::TraceContextBuilder;
use crate::evaluate::types::RecordEvalSet;
use crate::tasks::evaluator::{AssertionEvaluator, FieldEvaluator};
use gavel_types::{
    AssertionTask, EvalRecord, EvaluationTask, LLMJudgeTask, TaskResult, TaskStatus, TaskSuite,
    TraceAssertionTask,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument};

/// Everything a spawned task execution needs, cloned per task.
#[derive(Clone)]
struct TaskContext {
    scoped_context: Value,
    spans: Option<Arc<Vec<gavel_types::Span>>>,
    agent: Option<Arc<dyn Agent>>,
    retry: RetryPolicy,
    stage: usize,
}

/// Walk one record through the suite's execution plan. Stages run in order;
/// tasks inside a stage are dependency-independent and run concurrently.
/// Per-record state is only touched between stages, so no locks are needed.
#[instrument(skip_all, fields(record_id = %record.id))]
pub(crate) async fn evaluate_record(
    record: Arc<EvalRecord>,
    suite: Arc<TaskSuite>,
    agent: Option<Arc<dyn Agent>>,
    retry: RetryPolicy,
) -> RecordEvalSet {
    let begin = Utc::now();

    let base_context = record.context.clone();
    let spans = record.spans.clone().map(Arc::new);

    let mut statuses: HashMap<String, TaskStatus> = HashMap::new();
    let mut outputs: HashMap<String, Value> = HashMap::new();
    let mut results: HashMap<String, TaskResult> = HashMap::new();

    for (stage_idx, stage) in suite.plan().stages.iter().enumerate() {
        debug!(stage = stage_idx, tasks = stage.len(), "Executing stage");

        let mut join_set: JoinSet<(String, TaskResult, Option<Value>)> = JoinSet::new();

        for task_id in stage {
            let task = match suite.get(task_id) {
                Some(task) => task,
                None => continue,
            };

            // upstream skip/failure propagates as Skipped, never Failed
            let blocked = task.depends_on().iter().any(|dep| {
                !matches!(statuses.get(dep.as_str()), Some(TaskStatus::Passed))
            });

            if blocked {
                let result = skipped_result(task, stage_idx);
                statuses.insert(task_id.clone(), TaskStatus::Skipped);
                results.insert(task_id.clone(), result);
                continue;
            }

            let context = TaskContext {
                scoped_context: build_scoped_context(&base_context, &outputs, task.depends_on()),
                spans: spans.clone(),
                agent: agent.clone(),
                retry: retry.clone(),
                stage: stage_idx,
            };
            let task = task.clone();

            join_set.spawn(async move {
                let task_id = task.id().to_string();
                let (result, output) = execute_task(&task, context).await;
                (task_id, result, output)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((task_id, result, output)) => {
                    statuses.insert(task_id.clone(), result.status);
                    if result.status == TaskStatus::Passed {
                        if let Some(output) = output {
                            outputs.insert(task_id.clone(), output);
                        }
                    }
                    results.insert(task_id, result);
                }
                Err(join_error) => {
                    error!(error = %join_error, "Task join error");
                    return RecordEvalSet::from_failure(
                        record.id.clone(),
                        format!("Task join error: {join_error}"),
                    );
                }
            }
        }
    }

    let duration_ms = (Utc::now() - begin).num_milliseconds();

    // order results by the plan: stage, then declaration
    let ordered: Vec<TaskResult> = suite
        .plan()
        .topological_order()
        .filter_map(|task_id| results.remove(task_id))
        .collect();

    RecordEvalSet::from_results(record.id.clone(), ordered, duration_ms)
}

/// Base context merged with the outputs of the task's declared dependencies,
/// each keyed by its task id.
fn build_scoped_context(
    base_context: &Value,
    outputs: &HashMap<String, Value>,
    depends_on: &[String],
) -> Value {
    if depends_on.is_empty() {
        return base_context.clone();
    }

    let mut scoped = match base_context {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("context".to_string(), other.clone());
            map
        }
    };

    for dep_id in depends_on {
        if let Some(output) = outputs.get(dep_id) {
            scoped.insert(dep_id.clone(), output.clone());
        }
    }

    Value::Object(scoped)
}

async fn execute_task(task: &EvaluationTask, context: TaskContext) -> (TaskResult, Option<Value>) {
    match task {
        EvaluationTask::Assertion(assertion) => execute_assertion(assertion, &context),
        EvaluationTask::LLMJudge(judge) => execute_judge(judge, &context).await,
        EvaluationTask::TraceAssertion(trace) => execute_trace_assertion(trace, &context),
    }
}

fn execute_assertion(
    task: &AssertionTask,
    context: &TaskContext,
) -> (TaskResult, Option<Value>) {
    let outcome = AssertionEvaluator::evaluate(
        &context.scoped_context,
        Some(&task.field_path),
        &task.operator,
        &task.expected_value,
        &task.id,
    );

    match outcome {
        Ok(result) => {
            let output = result.passed.then(|| result.actual.clone());
            (
                TaskResult {
                    created_at: Utc::now(),
                    task_id: task.id.clone(),
                    task_type: gavel_types::EvaluationTaskType::Assertion,
                    status: if result.passed {
                        TaskStatus::Passed
                    } else {
                        TaskStatus::Failed
                    },
                    actual: Some(result.actual),
                    expected: result.expected,
                    field_path: Some(task.field_path.clone()),
                    operator: task.operator,
                    condition: task.condition,
                    error: (!result.passed).then_some(result.message),
                    stage: context.stage,
                },
                output,
            )
        }
        Err(e) => (
            failed_result(
                &task.id,
                gavel_types::EvaluationTaskType::Assertion,
                Some(task.field_path.clone()),
                task.operator,
                task.expected_value.clone(),
                task.condition,
                context.stage,
                e,
            ),
            None,
        ),
    }
}

async fn execute_judge(task: &LLMJudgeTask, context: &TaskContext) -> (TaskResult, Option<Value>) {
    let fail = |e: EvaluationError| {
        (
            failed_result(
                &task.id,
                gavel_types::EvaluationTaskType::LLMJudge,
                Some(task.field_path.clone()),
                task.operator,
                task.expected_value.clone(),
                task.condition,
                context.stage,
                e,
            ),
            None,
        )
    };

    let agent = match &context.agent {
        Some(agent) => agent.clone(),
        None => return fail(EvaluationError::MissingAgent),
    };

    let bound = match task.prompt.bind(&context.scoped_context) {
        Ok(bound) => bound,
        Err(e) => return fail(e.into()),
    };

    debug!(task_id = %task.id, "Invoking agent");
    let response = match call_with_retry(agent.as_ref(), &bound, task.max_retries, &context.retry)
        .await
    {
        Ok(response) => response,
        Err(e) => return fail(e),
    };

    // expected-value interpolation still resolves against the record
    // context, not the agent response
    let expected =
        match FieldEvaluator::interpolate_expected(&task.expected_value, &context.scoped_context) {
            Ok(expected) => expected,
            Err(e) => return fail(e),
        };

    let actual = match FieldEvaluator::extract_field_value(&response, &task.field_path) {
        Ok(actual) => actual.clone(),
        Err(e) => return fail(e),
    };

    let passed = match AssertionEvaluator::compare_values(&actual, &task.operator, &expected) {
        Ok(passed) => passed,
        Err(e) => return fail(e),
    };

    (
        TaskResult {
            created_at: Utc::now(),
            task_id: task.id.clone(),
            task_type: gavel_types::EvaluationTaskType::LLMJudge,
            status: if passed {
                TaskStatus::Passed
            } else {
                TaskStatus::Failed
            },
            actual: Some(actual.clone()),
            expected: expected.clone(),
            field_path: Some(task.field_path.clone()),
            operator: task.operator,
            condition: task.condition,
            error: (!passed).then(|| {
                format!(
                    "✗ Task '{}' failed: {} expected {}, got {}",
                    task.id,
                    task.operator,
                    serde_json::to_string(&expected).unwrap_or_default(),
                    serde_json::to_string(&actual).unwrap_or_default()
                )
            }),
            stage: context.stage,
        },
        passed.then_some(response),
    )
}

fn execute_trace_assertion(
    task: &TraceAssertionTask,
    context: &TaskContext,
) -> (TaskResult, Option<Value>) {
    let fail = |e: EvaluationError| {
        (
            failed_result(
                &task.id,
                gavel_types::EvaluationTaskType::TraceAssertion,
                None,
                task.operator,
                task.expected_value.clone(),
                task.condition,
                context.stage,
                e,
            ),
            None,
        )
    };

    let spans = match &context.spans {
        Some(spans) if !spans.is_empty() => spans,
        _ => return fail(EvaluationError::NoSpans),
    };

    let trace = TraceContextBuilder::new(spans);
    let actual = match trace.build_actual(&task.assertion) {
        Ok(actual) => actual,
        Err(e) => return fail(e),
    };

    let expected =
        match FieldEvaluator::interpolate_expected(&task.expected_value, &context.scoped_context) {
            Ok(expected) => expected,
            Err(e) => return fail(e),
        };

    let passed = match AssertionEvaluator::compare_values(&actual, &task.operator, &expected) {
        Ok(passed) => passed,
        Err(e) => return fail(e),
    };

    (
        TaskResult {
            created_at: Utc::now(),
            task_id: task.id.clone(),
            task_type: gavel_types::EvaluationTaskType::TraceAssertion,
            status: if passed {
                TaskStatus::Passed
            } else {
                TaskStatus::Failed
            },
            actual: Some(actual.clone()),
            expected: expected.clone(),
            field_path: None,
            operator: task.operator,
            condition: task.condition,
            error: (!passed).then(|| {
                format!(
                    "✗ Task '{}' failed: {} expected {}, got {}",
                    task.id,
                    task.operator,
                    serde_json::to_string(&expected).unwrap_or_default(),
                    serde_json::to_string(&actual).unwrap_or_default()
                )
            }),
            stage: context.stage,
        },
        passed.then_some(actual),
    )
}

fn skipped_result(task: &EvaluationTask, stage: usize) -> TaskResult {
    TaskResult {
        created_at: Utc::now(),
        task_id: task.id().to_string(),
        task_type: task.task_type(),
        status: TaskStatus::Skipped,
        actual: None,
        expected: task.expected_value().clone(),
        field_path: task.field_path().map(|p| p.to_string()),
        operator: *task.operator(),
        condition: task.condition(),
        error: None,
        stage,
    }
}

#[allow(clippy::too_many_arguments)]
fn failed_result(
    task_id: &str,
    task_type: gavel_types::EvaluationTaskType,
    field_path: Option<String>,
    operator: gavel_types::ComparisonOperator,
    expected: Value,
    condition: bool,
    stage: usize,
    error: EvaluationError,
) -> TaskResult {
    TaskResult {
        created_at: Utc::now(),
        task_id: task_id.to_string(),
        task_type,
        status: TaskStatus::Failed,
        actual: None,
        expected,
        field_path,
        operator,
        condition,
        error: Some(error.to_string()),
        stage,
    }
}
