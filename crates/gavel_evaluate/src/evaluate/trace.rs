use crate::error::EvaluationError;
use gavel_types::{AggregationType, Span, SpanFilter, TraceAssertion, SpanStatus, ValueExt};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

/// Evaluates span filters and trace assertions over one record's trace,
/// producing the actual value a trace assertion task feeds to its comparison
/// operator.
#[derive(Debug)]
pub struct TraceContextBuilder<'a> {
    /// Spans ordered by start time.
    spans: Vec<&'a Span>,
}

impl<'a> TraceContextBuilder<'a> {
    pub fn new(spans: &'a [Span]) -> Self {
        let mut ordered: Vec<&Span> = spans.iter().collect();
        ordered.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.span_id.cmp(&b.span_id))
        });
        Self { spans: ordered }
    }

    /// Compute the actual value for a trace assertion.
    pub fn build_actual(&self, assertion: &TraceAssertion) -> Result<Value, EvaluationError> {
        match assertion {
            TraceAssertion::SpanCount { filter } => Ok(json!(self.count_spans(filter)?)),
            TraceAssertion::SpanExists { filter } => Ok(json!(self.span_exists(filter)?)),
            TraceAssertion::SpanAttribute {
                filter,
                attribute_key,
            } => self.extract_span_attribute(filter, attribute_key),
            TraceAssertion::SpanDuration { filter } => self.extract_span_duration(filter),
            TraceAssertion::SpanAggregation {
                filter,
                attribute_key,
                aggregation,
            } => self.aggregate_span_attribute(filter, attribute_key, aggregation),
            TraceAssertion::SpanSequence { span_names } => {
                Ok(json!(self.matches_subsequence(span_names)))
            }
            TraceAssertion::SpanSet { span_names } => Ok(json!(self.matches_span_set(span_names))),
            TraceAssertion::TraceDuration {} => Ok(json!(self.trace_duration_ms())),
            TraceAssertion::TraceSpanCount {} => Ok(json!(self.spans.len())),
            TraceAssertion::TraceErrorCount {} => Ok(json!(self.count_error_spans())),
            TraceAssertion::TraceServiceCount {} => Ok(json!(self.count_unique_services())),
            TraceAssertion::TraceMaxDepth {} => Ok(json!(self.max_depth())),
            TraceAssertion::TraceAttribute { attribute_key } => {
                self.extract_trace_attribute(attribute_key)
            }
        }
    }

    fn filter_spans(&self, filter: &SpanFilter) -> Result<Vec<&'a Span>, EvaluationError> {
        let mut filtered = Vec::new();

        for span in &self.spans {
            if Self::matches_filter(span, filter)? {
                filtered.push(*span);
            }
        }

        Ok(filtered)
    }

    fn matches_filter(span: &Span, filter: &SpanFilter) -> Result<bool, EvaluationError> {
        match filter {
            SpanFilter::ByName { name } => Ok(span.name == *name),

            SpanFilter::ByNamePattern { pattern } => {
                let regex = Regex::new(pattern)?;
                Ok(regex.is_match(&span.name))
            }

            SpanFilter::WithAttribute { key } => Ok(span.attributes.contains_key(key)),

            SpanFilter::WithAttributeValue { key, value } => {
                Ok(span.attribute(key).map(|v| v == value).unwrap_or(false))
            }

            SpanFilter::WithStatus { status } => Ok(span.status == *status),

            SpanFilter::WithDuration { min_ms, max_ms } => {
                let min_ok = min_ms.map_or(true, |min| span.duration_ms >= min);
                let max_ok = max_ms.map_or(true, |max| span.duration_ms <= max);
                Ok(min_ok && max_ok)
            }

            SpanFilter::And { filters } => {
                for f in filters {
                    if !Self::matches_filter(span, f)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }

            SpanFilter::Or { filters } => {
                for f in filters {
                    if Self::matches_filter(span, f)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }

            SpanFilter::Sequence { .. } => Err(EvaluationError::InvalidFilter(
                "Sequence filter not applicable to individual spans".to_string(),
            )),
        }
    }

    fn count_spans(&self, filter: &SpanFilter) -> Result<usize, EvaluationError> {
        match filter {
            SpanFilter::Sequence { names } => Ok(self.count_subsequence_occurrences(names)),
            _ => Ok(self.filter_spans(filter)?.len()),
        }
    }

    fn span_exists(&self, filter: &SpanFilter) -> Result<bool, EvaluationError> {
        Ok(self.count_spans(filter)? > 0)
    }

    fn ordered_span_names(&self) -> impl Iterator<Item = &str> {
        self.spans.iter().map(|s| s.name.as_str())
    }

    /// True when the named spans occur in that relative order among the
    /// trace's spans; gaps are allowed.
    fn matches_subsequence(&self, span_names: &[String]) -> bool {
        if span_names.is_empty() {
            return true;
        }

        let mut wanted = span_names.iter();
        let mut next = wanted.next();

        for name in self.ordered_span_names() {
            match next {
                Some(expected) if expected == name => next = wanted.next(),
                _ => {}
            }
            if next.is_none() {
                return true;
            }
        }

        next.is_none()
    }

    /// Count disjoint occurrences of the ordered run.
    fn count_subsequence_occurrences(&self, names: &[String]) -> usize {
        if names.is_empty() {
            return 0;
        }

        let mut count = 0;
        let mut position = 0;

        for name in self.ordered_span_names() {
            if names[position] == name {
                position += 1;
                if position == names.len() {
                    count += 1;
                    position = 0;
                }
            }
        }

        count
    }

    fn matches_span_set(&self, span_names: &[String]) -> bool {
        let present: HashSet<&str> = self.ordered_span_names().collect();
        span_names.iter().all(|name| present.contains(name.as_str()))
    }

    /// Select exactly one span or error: zero matches and multiple matches
    /// are both ambiguous for single-span assertions.
    fn single_span(&self, filter: &SpanFilter) -> Result<&'a Span, EvaluationError> {
        let filtered = self.filter_spans(filter)?;
        match filtered.len() {
            0 => Err(EvaluationError::NoMatchingSpan),
            1 => Ok(filtered[0]),
            n => Err(EvaluationError::AmbiguousSpanMatch(n)),
        }
    }

    fn extract_span_attribute(
        &self,
        filter: &SpanFilter,
        attribute_key: &str,
    ) -> Result<Value, EvaluationError> {
        let span = self.single_span(filter)?;

        span.attribute(attribute_key)
            .cloned()
            .ok_or_else(|| EvaluationError::AttributeNotFound(attribute_key.to_string()))
    }

    fn extract_span_duration(&self, filter: &SpanFilter) -> Result<Value, EvaluationError> {
        let span = self.single_span(filter)?;
        Ok(json!(span.duration_ms))
    }

    fn aggregate_span_attribute(
        &self,
        filter: &SpanFilter,
        attribute_key: &str,
        aggregation: &AggregationType,
    ) -> Result<Value, EvaluationError> {
        let filtered = self.filter_spans(filter)?;

        if *aggregation == AggregationType::Count {
            let count = filtered
                .iter()
                .filter(|span| span.attributes.contains_key(attribute_key))
                .count();
            return Ok(json!(count));
        }

        let mut values = Vec::new();
        for span in &filtered {
            if let Some(value) = span.attribute(attribute_key) {
                let number = value
                    .as_numeric()
                    .ok_or_else(|| {
                        EvaluationError::NonNumericAggregation(attribute_key.to_string())
                    })?;
                values.push(number);
            }
        }

        if values.is_empty() {
            return Err(EvaluationError::AttributeNotFound(
                attribute_key.to_string(),
            ));
        }

        let result = match aggregation {
            AggregationType::Count => unreachable!(),
            AggregationType::Sum => values.iter().sum(),
            AggregationType::Average => values.iter().sum::<f64>() / values.len() as f64,
            AggregationType::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggregationType::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggregationType::First => values[0],
            AggregationType::Last => values[values.len() - 1],
        };

        Ok(json!(result))
    }

    /// Latest span end minus earliest span start, in milliseconds.
    fn trace_duration_ms(&self) -> f64 {
        let earliest_start = match self.spans.first() {
            Some(span) => span.start_time,
            None => return 0.0,
        };

        let latest_end = self
            .spans
            .iter()
            .map(|s| s.end_time())
            .max()
            .unwrap_or(earliest_start);

        (latest_end - earliest_start).num_microseconds().unwrap_or(0) as f64 / 1000.0
    }

    fn count_error_spans(&self) -> usize {
        self.spans
            .iter()
            .filter(|s| s.status == SpanStatus::Error)
            .count()
    }

    fn count_unique_services(&self) -> usize {
        self.spans
            .iter()
            .map(|s| s.service_name.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Deepest parent chain, root = 0. Spans whose parent is outside the
    /// trace count as roots.
    fn max_depth(&self) -> usize {
        let by_id: HashMap<&str, &Span> = self
            .spans
            .iter()
            .map(|span| (span.span_id.as_str(), *span))
            .collect();

        let mut max = 0;
        for span in &self.spans {
            let mut depth = 0;
            let mut current = *span;
            // cycle guard: a well-formed trace never chains deeper than its span count
            while let Some(parent_id) = current.parent_span_id.as_deref() {
                match by_id.get(parent_id) {
                    Some(parent) if depth < self.spans.len() => {
                        depth += 1;
                        current = *parent;
                    }
                    _ => break,
                }
            }
            max = max.max(depth);
        }

        max
    }

    fn extract_trace_attribute(&self, attribute_key: &str) -> Result<Value, EvaluationError> {
        let root = self
            .spans
            .iter()
            .find(|s| s.is_root())
            .ok_or(EvaluationError::NoRootSpan)?;

        root.attribute(attribute_key)
            .cloned()
            .ok_or_else(|| EvaluationError::AttributeNotFound(attribute_key.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use std::collections::BTreeMap;

    pub struct SpanBuilder {
        service_name: String,
        current_time: DateTime<Utc>,
        next_span_id: u32,
    }

    impl SpanBuilder {
        pub fn new(service_name: impl Into<String>) -> Self {
            Self {
                service_name: service_name.into(),
                current_time: Utc::now(),
                next_span_id: 0,
            }
        }

        pub fn create_span(
            &mut self,
            name: impl Into<String>,
            parent_id: Option<&str>,
            duration_ms: f64,
            status: SpanStatus,
        ) -> Span {
            let span_id = format!("span_{}", self.next_span_id);
            self.next_span_id += 1;

            let start_time = self.current_time;
            self.current_time = start_time + Duration::milliseconds(duration_ms as i64);

            Span {
                span_id,
                parent_span_id: parent_id.map(|p| p.to_string()),
                name: name.into(),
                service_name: self.service_name.clone(),
                status,
                attributes: BTreeMap::new(),
                start_time,
                duration_ms,
            }
        }

        pub fn with_attributes(mut span: Span, attrs: Vec<(&str, Value)>) -> Span {
            span.attributes = attrs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
            span
        }
    }

    pub fn create_simple_trace() -> Vec<Span> {
        let mut builder = SpanBuilder::new("test_service");

        vec![
            builder.create_span("root", None, 100.0, SpanStatus::Ok),
            builder.create_span("child_1", Some("span_0"), 50.0, SpanStatus::Ok),
            builder.create_span("child_2", Some("span_0"), 30.0, SpanStatus::Ok),
        ]
    }

    pub fn create_trace_with_attributes() -> Vec<Span> {
        let mut builder = SpanBuilder::new("attribute_service");

        let root = SpanBuilder::with_attributes(
            builder.create_span("root", None, 150.0, SpanStatus::Ok),
            vec![
                ("http.method", json!("POST")),
                ("http.status_code", json!(200)),
            ],
        );

        let api_call = SpanBuilder::with_attributes(
            builder.create_span("api_call", Some("span_0"), 100.0, SpanStatus::Ok),
            vec![
                ("model", json!("gpt-4")),
                ("tokens.input", json!(150)),
                ("tokens.output", json!(300)),
                ("cost", json!(0.045)),
            ],
        );

        let retry = SpanBuilder::with_attributes(
            builder.create_span("api_call", Some("span_0"), 80.0, SpanStatus::Ok),
            vec![("model", json!("gpt-4")), ("tokens.output", json!(120))],
        );

        vec![root, api_call, retry]
    }

    pub fn create_sequence_pattern_trace() -> Vec<Span> {
        let mut builder = SpanBuilder::new("pattern_service");

        vec![
            builder.create_span("start", None, 50.0, SpanStatus::Ok),
            builder.create_span("call_tool", Some("span_0"), 100.0, SpanStatus::Ok),
            builder.create_span("reflect", Some("span_1"), 20.0, SpanStatus::Ok),
            builder.create_span("run_agent", Some("span_2"), 150.0, SpanStatus::Ok),
            builder.create_span("call_tool", Some("span_3"), 80.0, SpanStatus::Ok),
            builder.create_span("run_agent", Some("span_4"), 120.0, SpanStatus::Ok),
            builder.create_span("finish", Some("span_5"), 30.0, SpanStatus::Ok),
        ]
    }

    pub fn create_trace_with_errors() -> Vec<Span> {
        let mut builder = SpanBuilder::new("error_service");

        vec![
            builder.create_span("root", None, 200.0, SpanStatus::Ok),
            builder.create_span("failing_operation", Some("span_0"), 100.0, SpanStatus::Error),
            builder.create_span("recovery", Some("span_0"), 50.0, SpanStatus::Ok),
        ]
    }
}
