use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display)]
pub enum SpanStatus {
    Ok,
    Error,
    #[default]
    Unset,
}

/// One timed unit of work in a record's trace. Parent linkage is enough to
/// compute depth; `service_name` feeds the distinct-service count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    pub span_id: String,

    #[serde(default)]
    pub parent_span_id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub service_name: String,

    #[serde(default)]
    pub status: SpanStatus,

    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,

    pub start_time: DateTime<Utc>,

    pub duration_ms: f64,
}

impl Span {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::microseconds((self.duration_ms * 1000.0) as i64)
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}

/// Recursive predicate tree over spans. `And`/`Or` compose over the full
/// child list; `Sequence` is structural and only meaningful at the trace
/// level (matching an ordered run of span names, gaps allowed).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SpanFilter {
    ByName { name: String },
    ByNamePattern { pattern: String },
    WithAttribute { key: String },
    WithAttributeValue { key: String, value: Value },
    WithStatus { status: SpanStatus },
    WithDuration { min_ms: Option<f64>, max_ms: Option<f64> },
    Sequence { names: Vec<String> },
    And { filters: Vec<SpanFilter> },
    Or { filters: Vec<SpanFilter> },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
pub enum AggregationType {
    Count,
    Sum,
    Average,
    Min,
    Max,
    First,
    Last,
}

/// Computes the actual value a trace assertion task feeds to its comparison
/// operator. Span-level variants select spans with a filter first;
/// trace-level variants compute directly over the whole span collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TraceAssertion {
    SpanCount {
        filter: SpanFilter,
    },
    SpanExists {
        filter: SpanFilter,
    },
    SpanAttribute {
        filter: SpanFilter,
        attribute_key: String,
    },
    SpanDuration {
        filter: SpanFilter,
    },
    SpanAggregation {
        filter: SpanFilter,
        attribute_key: String,
        aggregation: AggregationType,
    },
    SpanSequence {
        span_names: Vec<String>,
    },
    SpanSet {
        span_names: Vec<String>,
    },
    TraceDuration {},
    TraceSpanCount {},
    TraceErrorCount {},
    TraceServiceCount {},
    TraceMaxDepth {},
    TraceAttribute {
        attribute_key: String,
    },
}
