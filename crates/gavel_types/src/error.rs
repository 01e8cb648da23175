use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypeError {
    #[error("Prompt template is empty")]
    EmptyPromptTemplate,

    #[error("Prompt for task '{0}' must bind at least one context parameter")]
    NeedAtLeastOneBoundParameter(String),

    #[error("Prompt parameter '{0}' not found in record context")]
    MissingPromptParameter(String),

    #[error("Record context must be a JSON object")]
    ContextMustBeObject,

    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SuiteError {
    #[error("Task list is empty")]
    EmptyTaskList,

    #[error("Duplicate task id: '{0}'")]
    DuplicateTaskId(String),

    #[error("Task '{task_id}' depends on unknown task '{dependency}'")]
    UnknownDependency { task_id: String, dependency: String },

    #[error("Task dependencies contain a cycle")]
    CyclicDependency,

    #[error("Task '{0}' not found in suite")]
    TaskNotFound(String),

    #[error("Unsupported task file format: '{0}' (expected 'yaml' or 'json')")]
    UnsupportedFormat(String),

    #[error("Failed to parse task file: {0}")]
    MalformedTaskFile(String),

    #[error(transparent)]
    TypeError(#[from] TypeError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
}
