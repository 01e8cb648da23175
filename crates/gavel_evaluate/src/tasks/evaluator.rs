use crate::error::EvaluationError;
use gavel_types::{ComparisonOperator, ValueExt};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const INTERPOLATION_PATTERN: &str = r"\$\{([a-zA-Z_][a-zA-Z0-9_.\[\]]*)\}";
static INTERPOLATION_REGEX: OnceLock<Regex> = OnceLock::new();

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

pub struct FieldEvaluator;

/// Resolves dotted paths (`field`, `field.subfield`, `field[0].subfield`,
/// `matrix[0][1]`) against a JSON value. Paths are resolved as they are
/// parsed, one dot-separated segment at a time, so errors name the exact
/// segment that broke the walk.
impl FieldEvaluator {
    pub fn extract_field_value<'a>(
        json: &'a Value,
        field_path: &str,
    ) -> Result<&'a Value, EvaluationError> {
        if field_path.trim().is_empty() {
            return Err(EvaluationError::EmptyFieldPath);
        }

        let mut current = json;
        for segment in field_path.split('.') {
            current = Self::resolve_segment(current, segment)?;
        }

        Ok(current)
    }

    /// One segment is a field name followed by zero or more `[idx]`
    /// suffixes; the name may be absent when the path starts with an index
    /// into a top-level array.
    fn resolve_segment<'a>(
        value: &'a Value,
        segment: &str,
    ) -> Result<&'a Value, EvaluationError> {
        let (name, indices) = match segment.find('[') {
            Some(bracket) => segment.split_at(bracket),
            None => (segment, ""),
        };

        if name.is_empty() && indices.is_empty() {
            return Err(EvaluationError::EmptyFieldPath);
        }

        let mut current = value;

        if !name.is_empty() {
            current = current
                .get(name)
                .ok_or_else(|| EvaluationError::FieldNotFound(name.to_string()))?;
        }

        let mut rest = indices;
        while !rest.is_empty() {
            let (index_str, tail) = rest
                .strip_prefix('[')
                .and_then(|inner| inner.split_once(']'))
                .ok_or_else(|| EvaluationError::InvalidArrayIndex(rest.to_string()))?;

            let index: usize = index_str
                .parse()
                .map_err(|_| EvaluationError::InvalidArrayIndex(index_str.to_string()))?;

            current = current
                .get(index)
                .ok_or(EvaluationError::IndexNotFound(index))?;

            rest = tail;
        }

        Ok(current)
    }

    /// Resolve `${path}` tokens inside an expected value against the merged
    /// context. A string that is exactly one token substitutes the resolved
    /// value with its type preserved; embedded tokens substitute a rendered
    /// string. Arrays and objects are walked recursively.
    pub fn interpolate_expected(
        expected: &Value,
        context: &Value,
    ) -> Result<Value, EvaluationError> {
        let regex = INTERPOLATION_REGEX.get_or_init(|| {
            Regex::new(INTERPOLATION_PATTERN)
                .expect("Invalid regex pattern in INTERPOLATION_PATTERN")
        });

        match expected {
            Value::String(s) => {
                if let Some(capture) = regex.captures(s) {
                    if capture.get(0).map(|m| m.as_str()) == Some(s.as_str()) {
                        // whole-string token: keep the resolved value's type
                        let resolved = Self::extract_field_value(context, &capture[1])?;
                        return Ok(resolved.clone());
                    }
                }

                let mut rendered = s.clone();
                for capture in regex.captures_iter(s) {
                    let resolved = Self::extract_field_value(context, &capture[1])?;
                    let replacement = match resolved {
                        Value::String(inner) => inner.clone(),
                        other => other.to_string(),
                    };
                    rendered = rendered.replace(&capture[0], &replacement);
                }

                Ok(Value::String(rendered))
            }
            Value::Array(items) => {
                let interpolated: Result<Vec<_>, _> = items
                    .iter()
                    .map(|item| Self::interpolate_expected(item, context))
                    .collect();
                Ok(Value::Array(interpolated?))
            }
            Value::Object(map) => {
                let mut interpolated = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    interpolated.insert(key.clone(), Self::interpolate_expected(value, context)?);
                }
                Ok(Value::Object(interpolated))
            }
            other => Ok(other.clone()),
        }
    }
}

/// Outcome of one operator application.
#[derive(Debug, Clone)]
pub struct AssertionResult {
    pub passed: bool,
    pub actual: Value,
    pub expected: Value,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AssertionEvaluator;

impl AssertionEvaluator {
    /// Resolve the actual value, interpolate the expected value, and apply
    /// the operator. The caller decides how a returned error is reported;
    /// during suite execution it becomes a `Failed` task result.
    pub fn evaluate(
        context: &Value,
        field_path: Option<&str>,
        operator: &ComparisonOperator,
        expected_raw: &Value,
        task_id: &str,
    ) -> Result<AssertionResult, EvaluationError> {
        let actual = match field_path {
            Some(path) => FieldEvaluator::extract_field_value(context, path)?.clone(),
            None => context.clone(),
        };

        let expected = FieldEvaluator::interpolate_expected(expected_raw, context)?;
        let passed = Self::compare_values(&actual, operator, &expected)?;

        Ok(AssertionResult {
            passed,
            message: if passed {
                format!("✓ Task '{task_id}' passed")
            } else {
                format!(
                    "✗ Task '{task_id}' failed: {} expected {}, got {}",
                    operator,
                    serde_json::to_string(&expected).unwrap_or_default(),
                    serde_json::to_string(&actual).unwrap_or_default()
                )
            },
            actual,
            expected,
        })
    }

    pub fn compare_values(
        actual: &Value,
        operator: &ComparisonOperator,
        expected: &Value,
    ) -> Result<bool, EvaluationError> {
        match operator {
            ComparisonOperator::Equals => Ok(Self::values_equal(actual, expected)),
            ComparisonOperator::NotEquals => Ok(!Self::values_equal(actual, expected)),

            ComparisonOperator::GreaterThan => Self::compare_numeric(actual, expected, |a, b| a > b),
            ComparisonOperator::GreaterThanOrEqual => {
                Self::compare_numeric(actual, expected, |a, b| a >= b)
            }
            ComparisonOperator::LessThan => Self::compare_numeric(actual, expected, |a, b| a < b),
            ComparisonOperator::LessThanOrEqual => {
                Self::compare_numeric(actual, expected, |a, b| a <= b)
            }

            ComparisonOperator::Contains => Self::check_contains(actual, expected),
            ComparisonOperator::NotContains => Ok(!Self::check_contains(actual, expected)?),
            ComparisonOperator::StartsWith => Self::check_starts_with(actual, expected),
            ComparisonOperator::EndsWith => Self::check_ends_with(actual, expected),
            ComparisonOperator::Matches => Self::check_regex_match(actual, expected),

            ComparisonOperator::HasLengthGreaterThan => {
                Self::compare_length(actual, expected, |a, b| a > b)
            }
            ComparisonOperator::HasLengthGreaterThanOrEqual => {
                Self::compare_length(actual, expected, |a, b| a >= b)
            }
            ComparisonOperator::HasLengthEqual => {
                Self::compare_length(actual, expected, |a, b| a == b)
            }

            ComparisonOperator::InRange => Self::check_in_range(actual, expected),

            ComparisonOperator::IsEmail => {
                Self::check_predicate(expected, Self::is_email(actual))
            }
            ComparisonOperator::IsNumeric => {
                Self::check_predicate(expected, Self::is_numeric(actual))
            }
            ComparisonOperator::IsString => Self::check_predicate(expected, actual.is_string()),

            ComparisonOperator::IsNotEmpty => match expected {
                Value::Bool(want) => Ok(actual.is_not_empty() == *want),
                _ => Ok(actual.is_not_empty()),
            },

            ComparisonOperator::SequenceMatches => match (actual, expected) {
                (Value::Bool(a), Value::Bool(e)) => Ok(a == e),
                _ => Err(EvaluationError::InvalidSequenceMatchesOperation),
            },
        }
    }

    /// Numbers compare numerically regardless of integer/float encoding;
    /// everything else falls back to deep equality.
    fn values_equal(actual: &Value, expected: &Value) -> bool {
        match (actual.as_numeric(), expected.as_numeric()) {
            (Some(a), Some(e)) => a == e,
            _ => actual == expected,
        }
    }

    fn compare_numeric<F>(
        actual: &Value,
        expected: &Value,
        comparator: F,
    ) -> Result<bool, EvaluationError>
    where
        F: Fn(f64, f64) -> bool,
    {
        let actual_num = actual
            .as_numeric()
            .ok_or(EvaluationError::CannotCompareNonNumericValues)?;
        let expected_num = expected
            .as_numeric()
            .ok_or(EvaluationError::CannotCompareNonNumericValues)?;

        Ok(comparator(actual_num, expected_num))
    }

    fn compare_length<F>(
        actual: &Value,
        expected: &Value,
        comparator: F,
    ) -> Result<bool, EvaluationError>
    where
        F: Fn(i64, i64) -> bool,
    {
        let length = actual
            .to_length()
            .ok_or_else(|| EvaluationError::CannotGetLength(format!("{actual:?}")))?;

        let expected_length = expected
            .as_i64()
            .ok_or(EvaluationError::ExpectedLengthMustBeInteger)?;

        Ok(comparator(length, expected_length))
    }

    fn check_contains(actual: &Value, expected: &Value) -> Result<bool, EvaluationError> {
        match (actual, expected) {
            (Value::String(s), Value::String(substr)) => Ok(s.contains(substr)),
            (Value::Array(arr), expected_item) => {
                Ok(arr.iter().any(|item| Self::values_equal(item, expected_item)))
            }
            _ => Err(EvaluationError::InvalidContainsOperation),
        }
    }

    fn check_starts_with(actual: &Value, expected: &Value) -> Result<bool, EvaluationError> {
        match (actual, expected) {
            (Value::String(s), Value::String(prefix)) => Ok(s.starts_with(prefix)),
            _ => Err(EvaluationError::InvalidStartsWithOperation),
        }
    }

    fn check_ends_with(actual: &Value, expected: &Value) -> Result<bool, EvaluationError> {
        match (actual, expected) {
            (Value::String(s), Value::String(suffix)) => Ok(s.ends_with(suffix)),
            _ => Err(EvaluationError::InvalidEndsWithOperation),
        }
    }

    fn check_regex_match(actual: &Value, expected: &Value) -> Result<bool, EvaluationError> {
        match (actual, expected) {
            (Value::String(s), Value::String(pattern)) => {
                let regex = Regex::new(pattern)?;
                Ok(regex.is_match(s))
            }
            _ => Err(EvaluationError::InvalidRegexOperation),
        }
    }

    fn check_in_range(actual: &Value, expected: &Value) -> Result<bool, EvaluationError> {
        let bounds = match expected {
            Value::Array(items) if items.len() == 2 => items,
            _ => return Err(EvaluationError::InvalidRangeFormat),
        };

        let low = bounds[0]
            .as_numeric()
            .ok_or(EvaluationError::InvalidRangeFormat)?;
        let high = bounds[1]
            .as_numeric()
            .ok_or(EvaluationError::InvalidRangeFormat)?;
        let value = actual
            .as_numeric()
            .ok_or(EvaluationError::CannotCompareNonNumericValues)?;

        Ok(value >= low && value <= high)
    }

    /// Type/format predicates pass when the computed outcome matches the
    /// expected boolean.
    fn check_predicate(expected: &Value, outcome: bool) -> Result<bool, EvaluationError> {
        match expected {
            Value::Bool(want) => Ok(outcome == *want),
            _ => Err(EvaluationError::ExpectedBooleanOutcome),
        }
    }

    fn is_email(actual: &Value) -> bool {
        let regex = EMAIL_REGEX
            .get_or_init(|| Regex::new(EMAIL_PATTERN).expect("Invalid EMAIL_PATTERN regex"));

        match actual {
            Value::String(s) => regex.is_match(s),
            _ => false,
        }
    }

    fn is_numeric(actual: &Value) -> bool {
        match actual {
            Value::Number(_) => true,
            Value::String(s) => s.parse::<f64>().is_ok(),
            _ => false,
        }
    }
}
