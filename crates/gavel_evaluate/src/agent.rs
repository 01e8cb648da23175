use crate::error::EvaluationError;
use async_trait::async_trait;
use gavel_types::BoundPrompt;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent call failed: {0}")]
    CallFailed(String),

    #[error("Agent call timed out after {0:?}")]
    Timeout(Duration),
}

/// External collaborator that executes a bound prompt and returns structured
/// output. This is the only suspension point in an evaluation run; provider
/// plumbing lives entirely behind this trait.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute_prompt(&self, prompt: &BoundPrompt) -> Result<Value, AgentError>;
}

/// Backoff and timeout applied to every agent call. The per-task retry count
/// comes from the task itself (`max_retries`).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: base_delay * 2^attempt.
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Call the agent, retrying up to `max_retries` times with exponential
/// backoff. Each attempt carries its own timeout. Exhausting retries returns
/// the terminal error; the caller records it as a failed task.
pub async fn call_with_retry(
    agent: &dyn Agent,
    prompt: &BoundPrompt,
    max_retries: u32,
    policy: &RetryPolicy,
) -> Result<Value, EvaluationError> {
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = policy.delay_for(attempt - 1);
            debug!(attempt, ?delay, "Retrying agent call");
            tokio::time::sleep(delay).await;
        }

        let result = tokio::time::timeout(policy.timeout, agent.execute_prompt(prompt)).await;

        match result {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(e)) => {
                warn!(attempt, error = %e, "Agent call failed");
                last_error = Some(e);
            }
            Err(_) => {
                warn!(attempt, timeout = ?policy.timeout, "Agent call timed out");
                last_error = Some(AgentError::Timeout(policy.timeout));
            }
        }
    }

    Err(EvaluationError::AgentError(
        last_error.unwrap_or_else(|| AgentError::CallFailed("no attempts made".to_string())),
    ))
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted agent for tests: returns a fixed response, optionally
    /// failing the first `fail_first` calls.
    pub struct MockAgent {
        response: Value,
        fail_first: u32,
        calls: AtomicU32,
    }

    impl MockAgent {
        pub fn returning(response: Value) -> Self {
            Self {
                response,
                fail_first: 0,
                calls: AtomicU32::new(0),
            }
        }

        pub fn failing_first(fail_first: u32, response: Value) -> Self {
            Self {
                response,
                fail_first,
                calls: AtomicU32::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Agent for MockAgent {
        async fn execute_prompt(&self, _prompt: &BoundPrompt) -> Result<Value, AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(AgentError::CallFailed(format!(
                    "scripted failure on call {call}"
                )));
            }
            Ok(self.response.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockAgent;
    use super::*;
    use serde_json::json;

    fn prompt() -> BoundPrompt {
        BoundPrompt {
            content: "score this".to_string(),
            system: None,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let agent = MockAgent::failing_first(2, json!({"score": 4}));

        let response = call_with_retry(&agent, &prompt(), 3, &fast_policy())
            .await
            .unwrap();

        assert_eq!(response, json!({"score": 4}));
        assert_eq!(agent.call_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_terminal_error() {
        let agent = MockAgent::failing_first(10, json!(null));

        let err = call_with_retry(&agent, &prompt(), 2, &fast_policy())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("scripted failure"));
        // max_retries = 2 means three attempts total
        assert_eq!(agent.call_count(), 3);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }
}
