use crate::error::{SuiteError, TypeError};
use crate::eval::{EvaluationTask, EvaluationTaskType};
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionNode {
    pub id: String,
    pub stage: usize,
    pub parents: Vec<String>,
    pub children: Vec<String>,
}

/// Staged topological order over the task graph. Tasks in the same stage
/// have no dependency relation between them; within a stage, ids keep their
/// declaration order so the plan is deterministic for a fixed input.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExecutionPlan {
    pub stages: Vec<Vec<String>>,
    pub nodes: BTreeMap<String, ExecutionNode>,
}

impl ExecutionPlan {
    pub fn stage_of(&self, task_id: &str) -> Option<usize> {
        self.nodes.get(task_id).map(|node| node.stage)
    }

    /// Flat topological order: stages concatenated.
    pub fn topological_order(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().flatten().map(String::as_str)
    }
}

/// Validated, immutable set of tasks plus the execution plan shared by every
/// record. Construction is where all structural errors surface: duplicate
/// ids, references to undeclared tasks and dependency cycles all fail here,
/// before anything is evaluated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSuite {
    tasks: Vec<EvaluationTask>,
    plan: ExecutionPlan,
    task_ids: BTreeSet<String>,
}

impl TaskSuite {
    pub fn new(mut tasks: Vec<EvaluationTask>) -> Result<Self, SuiteError> {
        if tasks.is_empty() {
            return Err(SuiteError::EmptyTaskList);
        }

        for task in tasks.iter_mut() {
            task.normalize_ids();
        }

        let mut task_ids = BTreeSet::new();
        for task in &tasks {
            if !task_ids.insert(task.id().to_string()) {
                return Err(SuiteError::DuplicateTaskId(task.id().to_string()));
            }
        }

        for task in &tasks {
            for dep in task.depends_on() {
                if !task_ids.contains(dep) {
                    return Err(SuiteError::UnknownDependency {
                        task_id: task.id().to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        for task in &tasks {
            if let EvaluationTask::LLMJudge(judge) = task {
                if judge.prompt.parameters().is_empty() {
                    return Err(SuiteError::TypeError(
                        TypeError::NeedAtLeastOneBoundParameter(judge.id.clone()),
                    ));
                }
            }
        }

        let plan = build_execution_plan(&tasks)?;

        Ok(Self {
            tasks,
            plan,
            task_ids,
        })
    }

    pub fn tasks(&self) -> &[EvaluationTask] {
        &self.tasks
    }

    pub fn get(&self, task_id: &str) -> Option<&EvaluationTask> {
        self.tasks.iter().find(|t| t.id() == task_id)
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.task_ids.contains(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn has_llm_tasks(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| t.task_type() == EvaluationTaskType::LLMJudge)
    }

    pub fn has_trace_tasks(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| t.task_type() == EvaluationTaskType::TraceAssertion)
    }

    /// Print the resolved execution plan to the console, annotating
    /// conditional gates and dependency edges.
    pub fn print_execution_plan(&self) {
        println!("\n{}", "Evaluation Execution Plan".bold().green());
        println!("{}", "═".repeat(70).green());

        let mut conditional_count = 0;

        for (stage_idx, stage) in self.plan.stages.iter().enumerate() {
            let stage_label = format!("Stage {}", stage_idx + 1);
            println!("\n{}", stage_label.bold().cyan());

            for (task_idx, task_id) in stage.iter().enumerate() {
                let is_last = task_idx == stage.len() - 1;
                let prefix = if is_last { "└─" } else { "├─" };

                let task = match self.get(task_id) {
                    Some(task) => task,
                    None => continue,
                };

                if task.condition() {
                    conditional_count += 1;
                }

                let colored_type = match task.task_type() {
                    EvaluationTaskType::Assertion => "Assertion".yellow().to_string(),
                    EvaluationTaskType::LLMJudge => "LLM Judge".purple().to_string(),
                    EvaluationTaskType::TraceAssertion => {
                        "Trace Assertion".bright_blue().to_string()
                    }
                };

                let conditional_marker = if task.condition() {
                    " [CONDITIONAL]".bright_red().to_string()
                } else {
                    String::new()
                };

                println!(
                    "{} {} ({}){}",
                    prefix,
                    task_id.bold(),
                    colored_type,
                    conditional_marker
                );

                let deps = task.depends_on();
                if !deps.is_empty() {
                    let dep_prefix = if is_last { "  " } else { "│ " };

                    let (conditional_deps, normal_deps): (Vec<_>, Vec<_>) = deps
                        .iter()
                        .partition(|dep| self.get(dep).map(|t| t.condition()).unwrap_or(false));

                    if !normal_deps.is_empty() {
                        println!(
                            "{}   {} {}",
                            dep_prefix,
                            "depends on:".dimmed(),
                            normal_deps
                                .iter()
                                .map(|s| s.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                                .dimmed()
                        );
                    }

                    if !conditional_deps.is_empty() {
                        println!(
                            "{}   {} {}",
                            dep_prefix,
                            "▶ conditional gate:".bright_red().dimmed(),
                            conditional_deps
                                .iter()
                                .map(|d| format!("{} must pass", d))
                                .collect::<Vec<_>>()
                                .join(", ")
                                .red()
                                .dimmed()
                        );
                    }
                }
            }
        }

        println!("\n{}", "═".repeat(70).green());
        println!(
            "{}: {} tasks across {} stages",
            "Summary".bold(),
            self.tasks.len(),
            self.plan.stages.len()
        );

        if conditional_count > 0 {
            println!(
                "{}: {} conditional tasks that create execution branches",
                "Branches".bold().bright_red(),
                conditional_count
            );
        }

        println!();
    }
}

/// Staged Kahn's algorithm. Seeding and stage membership follow declaration
/// order so ties always break the same way. Any task left unprocessed at the
/// end sits on a cycle.
fn build_execution_plan(tasks: &[EvaluationTask]) -> Result<ExecutionPlan, SuiteError> {
    let declaration_index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(idx, task)| (task.id(), idx))
        .collect();

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut parents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for task in tasks {
        children.entry(task.id()).or_default();
        parents.entry(task.id()).or_default();
        in_degree.entry(task.id()).or_insert(0);
    }

    for task in tasks {
        for dep in task.depends_on() {
            children.entry(dep.as_str()).or_default().push(task.id());
            parents.entry(task.id()).or_default().push(dep.as_str());
            *in_degree.entry(task.id()).or_insert(0) += 1;
        }
    }

    let mut stages: Vec<Vec<String>> = Vec::new();
    let mut nodes: BTreeMap<String, ExecutionNode> = BTreeMap::new();

    let mut current_stage: Vec<&str> = tasks
        .iter()
        .map(|task| task.id())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut stage_idx = 0;
    let mut processed = 0;

    while !current_stage.is_empty() {
        stages.push(current_stage.iter().map(|id| id.to_string()).collect());
        processed += current_stage.len();

        for task_id in &current_stage {
            nodes.insert(
                task_id.to_string(),
                ExecutionNode {
                    id: task_id.to_string(),
                    stage: stage_idx,
                    parents: parents[task_id].iter().map(|p| p.to_string()).collect(),
                    children: children[task_id].iter().map(|c| c.to_string()).collect(),
                },
            );
        }

        let mut next_stage: Vec<&str> = Vec::new();
        for task_id in &current_stage {
            for dependent in &children[task_id] {
                let degree = in_degree.get_mut(dependent).expect("dependent registered");
                *degree -= 1;
                if *degree == 0 {
                    next_stage.push(dependent);
                }
            }
        }

        next_stage.sort_by_key(|id| declaration_index[id]);
        current_stage = next_stage;
        stage_idx += 1;
    }

    if processed != tasks.len() {
        return Err(SuiteError::CyclicDependency);
    }

    Ok(ExecutionPlan { stages, nodes })
}
