use crate::agent::{Agent, RetryPolicy};
use crate::error::EvaluationError;
use crate::evaluate::executor::evaluate_record;
use crate::evaluate::types::{RecordEvalSet, ResultSet};
use gavel_types::{EvalRecord, EvaluationTask, SuiteError, TaskSuite, TypeError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument};

const DEFAULT_MAX_CONCURRENT_RECORDS: usize = 10;

/// Runtime knobs for one evaluation run. The suite and records stay
/// read-only; this only carries the agent handle, the worker-pool bound and
/// the external-call retry policy.
#[derive(Clone)]
pub struct EvaluationConfig {
    pub agent: Option<Arc<dyn Agent>>,

    /// Bound on how many records evaluate concurrently.
    pub max_concurrent_records: usize,

    pub retry: RetryPolicy,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            agent: None,
            max_concurrent_records: DEFAULT_MAX_CONCURRENT_RECORDS,
            retry: RetryPolicy::default(),
        }
    }
}

impl EvaluationConfig {
    pub fn with_agent(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent: Some(agent),
            ..Self::default()
        }
    }
}

impl fmt::Debug for EvaluationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationConfig")
            .field("agent", &self.agent.is_some())
            .field("max_concurrent_records", &self.max_concurrent_records)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Records plus a validated task suite. Immutable once constructed; context
/// overrides produce a new dataset sharing the same suite.
#[derive(Debug, Clone)]
pub struct Dataset {
    records: Arc<Vec<EvalRecord>>,
    suite: Arc<TaskSuite>,
}

impl Dataset {
    /// Build a dataset, validating the task set. Structural errors
    /// (duplicate ids, unknown dependencies, cycles) fail here, before any
    /// record is evaluated.
    pub fn new(records: Vec<EvalRecord>, tasks: Vec<EvaluationTask>) -> Result<Self, SuiteError> {
        Ok(Self {
            records: Arc::new(records),
            suite: Arc::new(TaskSuite::new(tasks)?),
        })
    }

    pub fn from_suite(records: Vec<EvalRecord>, suite: Arc<TaskSuite>) -> Self {
        Self {
            records: Arc::new(records),
            suite,
        }
    }

    pub fn records(&self) -> &[EvalRecord] {
        &self.records
    }

    pub fn suite(&self) -> &TaskSuite {
        &self.suite
    }

    /// New dataset with per-record context overrides shallow-merged in at
    /// top-level keys. Tasks are shared; record identity is preserved so run
    /// comparison still matches workflows.
    pub fn with_updated_contexts_by_id(
        &self,
        updates: &BTreeMap<String, Value>,
    ) -> Result<Dataset, TypeError> {
        let mut records = Vec::with_capacity(self.records.len());

        for record in self.records.iter() {
            match updates.get(&record.id) {
                Some(Value::Object(overrides)) => records.push(record.merged(overrides)),
                Some(_) => return Err(TypeError::ContextMustBeObject),
                None => records.push(record.clone()),
            }
        }

        Ok(Self {
            records: Arc::new(records),
            suite: self.suite.clone(),
        })
    }

    /// Print the resolved topological order to the console.
    pub fn print_execution_plan(&self) {
        self.suite.print_execution_plan();
    }

    /// Evaluate every record against the suite. Records run concurrently on
    /// a bounded worker pool; each record walks its task graph in dependency
    /// order. The returned set always carries an entry per record/task pair;
    /// partial failure is represented in the data, never by truncation.
    #[instrument(skip_all, fields(records = self.records.len(), tasks = self.suite.len()))]
    pub async fn evaluate(&self, config: &EvaluationConfig) -> Result<ResultSet, EvaluationError> {
        if self.suite.has_llm_tasks() && config.agent.is_none() {
            return Err(EvaluationError::MissingAgent);
        }

        debug!("Starting evaluation for {} records", self.records.len());

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_records.max(1)));
        let mut join_set: JoinSet<(usize, RecordEvalSet)> = JoinSet::new();

        for idx in 0..self.records.len() {
            let records = self.records.clone();
            let suite = self.suite.clone();
            let agent = config.agent.clone();
            let retry = config.retry.clone();
            let semaphore = semaphore.clone();

            join_set.spawn(async move {
                // the semaphore is never closed while the run is in flight
                let _permit = semaphore.acquire_owned().await.ok();
                let record = Arc::new(records[idx].clone());
                let eval_set = evaluate_record(record, suite, agent, retry).await;
                (idx, eval_set)
            });
        }

        let mut by_index: BTreeMap<usize, RecordEvalSet> = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, eval_set)) => {
                    by_index.insert(idx, eval_set);
                }
                Err(join_error) => {
                    error!(error = %join_error, "Record join error");
                }
            }
        }

        // keep one entry per record even if a worker died
        let records = (0..self.records.len())
            .map(|idx| {
                by_index.remove(&idx).unwrap_or_else(|| {
                    RecordEvalSet::from_failure(
                        self.records[idx].id.clone(),
                        "Record evaluation worker failed".to_string(),
                    )
                })
            })
            .collect();

        Ok(ResultSet::new(records))
    }

    /// Blocking convenience over [`Dataset::evaluate`] for callers without a
    /// runtime. Must not be called from within an async context.
    pub fn evaluate_blocking(
        &self,
        config: &EvaluationConfig,
    ) -> Result<ResultSet, EvaluationError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        runtime.block_on(self.evaluate(config))
    }
}
