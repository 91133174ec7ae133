//! Minimal span surface consumed by samplers and the reporter.
//!
//! The full span data model (events, references, logs) lives outside this
//! core; the reporter only needs identity, timing and tags to hand a span to
//! a [`Sender`](crate::sender::Sender).

use crate::span_context::SpanContext;
use std::borrow::Cow;
use std::time::{Duration, SystemTime};

/// A tag value attached to a span or produced by a sampling decision.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    /// String values
    String(Cow<'static, str>),
    /// Bool values
    Bool(bool),
    /// 64-bit float values
    F64(f64),
    /// 64-bit signed integer values
    I64(i64),
}

impl From<&'static str> for TagValue {
    fn from(value: &'static str) -> Self {
        TagValue::String(Cow::Borrowed(value))
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::String(Cow::Owned(value))
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::F64(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::I64(value)
    }
}

/// A finished span as handed to the reporter.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// Identity of this span.
    pub span_context: SpanContext,
    /// Operation (endpoint) name.
    pub operation_name: Cow<'static, str>,
    /// Wall-clock start time.
    pub start_time: SystemTime,
    /// Span duration.
    pub duration: Duration,
    /// Key-value tags, including the sampler verdict tags.
    pub tags: Vec<(Cow<'static, str>, TagValue)>,
}

impl SpanData {
    /// Create a span with the given identity and operation name, no tags.
    pub fn new(span_context: SpanContext, operation_name: impl Into<Cow<'static, str>>) -> Self {
        SpanData {
            span_context,
            operation_name: operation_name.into(),
            start_time: SystemTime::now(),
            duration: Duration::default(),
            tags: Vec::new(),
        }
    }
}
