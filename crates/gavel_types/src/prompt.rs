use crate::error::TypeError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

const PARAMETER_PATTERN: &str = r"\$\{([a-zA-Z_][a-zA-Z0-9_.]*)\}";
static PARAMETER_REGEX: OnceLock<Regex> = OnceLock::new();

fn parameter_regex() -> &'static Regex {
    PARAMETER_REGEX
        .get_or_init(|| Regex::new(PARAMETER_PATTERN).expect("Invalid PARAMETER_PATTERN regex"))
}

/// Prompt template for judge tasks. `${param}` placeholders are bound from
/// the record context when the task executes; a judge prompt must reference
/// at least one context parameter to have anything to evaluate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    pub template: String,

    #[serde(default)]
    pub system: Option<String>,
}

impl Prompt {
    pub fn new(template: &str) -> Result<Self, TypeError> {
        if template.trim().is_empty() {
            return Err(TypeError::EmptyPromptTemplate);
        }

        Ok(Self {
            template: template.to_string(),
            system: None,
        })
    }

    pub fn with_system(mut self, system: &str) -> Self {
        self.system = Some(system.to_string());
        self
    }

    /// Context paths referenced by the template, in order of appearance.
    pub fn parameters(&self) -> Vec<String> {
        parameter_regex()
            .captures_iter(&self.template)
            .map(|cap| cap[1].to_string())
            .collect()
    }

    /// Render the template against a record context. Each placeholder is
    /// resolved as a dotted path into the context; strings are inlined raw,
    /// other values as JSON.
    pub fn bind(&self, context: &Value) -> Result<BoundPrompt, TypeError> {
        let mut content = self.template.clone();

        for parameter in self.parameters() {
            let resolved = lookup_path(context, &parameter)
                .ok_or_else(|| TypeError::MissingPromptParameter(parameter.clone()))?;

            let rendered = match resolved {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };

            content = content.replace(&format!("${{{parameter}}}"), &rendered);
        }

        Ok(BoundPrompt {
            content,
            system: self.system.clone(),
        })
    }
}

/// A prompt with all parameters substituted, ready to hand to an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundPrompt {
    pub content: String,
    pub system: Option<String>,
}

fn lookup_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameters_extracted_in_order() {
        let prompt = Prompt::new("Given ${input.query}, score ${response}").unwrap();
        assert_eq!(prompt.parameters(), vec!["input.query", "response"]);
    }

    #[test]
    fn test_empty_template_rejected() {
        assert!(Prompt::new("   ").is_err());
    }

    #[test]
    fn test_bind_substitutes_context_values() {
        let prompt = Prompt::new("Rate '${response}' against ${scores.max}").unwrap();
        let context = json!({"response": "fine", "scores": {"max": 5}});

        let bound = prompt.bind(&context).unwrap();
        assert_eq!(bound.content, "Rate 'fine' against 5");
    }

    #[test]
    fn test_bind_missing_parameter_errors() {
        let prompt = Prompt::new("Rate ${missing}").unwrap();
        let err = prompt.bind(&json!({})).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
