//! Head-based sampling.
//!
//! A [`Sampler`] decides at root-span creation whether a trace is recorded;
//! the decision is final for the whole trace and travels with the context.
//! Alongside the verdict, samplers return tags identifying the strategy and
//! its parameter, so the backend can correct throughput statistics for
//! probabilistically sampled data.

use std::fmt;

use crate::span::TagValue;
use crate::span_context::TraceId;
use crate::TraceError;

mod per_operation;
mod rate_limiter;
mod remote;
mod strategies;

pub use per_operation::{GuaranteedThroughputSampler, PerOperationSampler};
pub use rate_limiter::{Clock, MonotonicClock, RateLimiter};
pub use remote::{RemotelyControlledSampler, RemotelyControlledSamplerBuilder, SamplingManager};
pub use strategies::{
    OperationSamplingStrategy, PerOperationSamplingStrategies, ProbabilisticSamplingStrategy,
    RateLimitingSamplingStrategy, SamplingStrategyResponse, SamplingStrategyType,
};

/// Span tag key reporting which strategy made the sampling decision.
pub const SAMPLER_TYPE_TAG_KEY: &str = "sampler.type";
/// Span tag key reporting the strategy's parameter.
pub const SAMPLER_PARAM_TAG_KEY: &str = "sampler.param";

pub(crate) const SAMPLER_TYPE_CONST: &str = "const";
pub(crate) const SAMPLER_TYPE_PROBABILISTIC: &str = "probabilistic";
pub(crate) const SAMPLER_TYPE_RATE_LIMITING: &str = "ratelimiting";
pub(crate) const SAMPLER_TYPE_LOWER_BOUND: &str = "lowerbound";

/// Outcome of a sampling decision.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingResult {
    /// Whether the trace should be recorded.
    pub sampled: bool,
    /// Tags to attach to the root span when the trace is sampled.
    pub tags: Vec<(&'static str, TagValue)>,
}

impl SamplingResult {
    fn new(sampled: bool, sampler_type: &'static str, param: impl Into<TagValue>) -> Self {
        SamplingResult {
            sampled,
            tags: vec![
                (SAMPLER_TYPE_TAG_KEY, sampler_type.into()),
                (SAMPLER_PARAM_TAG_KEY, param.into()),
            ],
        }
    }
}

/// Decides whether a new trace is recorded.
///
/// Called once per root span; must be cheap and must never block. Samplers
/// are shared across threads.
pub trait Sampler: Send + Sync + fmt::Debug {
    /// Decide whether the trace identified by `trace_id` should be sampled.
    ///
    /// `operation_name` is the root span's operation; most strategies ignore
    /// it, the per-operation sampler keys on it.
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingResult;

    /// Release background resources. Called at most once, when the owning
    /// tracer shuts down.
    fn close(&self) {}
}

/// A [`Sampler`] returning the same decision for every trace.
#[derive(Clone, Debug)]
pub struct ConstSampler {
    decision: bool,
}

impl ConstSampler {
    /// A sampler that always returns `decision`.
    pub fn new(decision: bool) -> Self {
        ConstSampler { decision }
    }
}

impl Sampler for ConstSampler {
    fn sample(&self, _operation_name: &str, _trace_id: TraceId) -> SamplingResult {
        SamplingResult::new(self.decision, SAMPLER_TYPE_CONST, self.decision)
    }
}

/// A [`Sampler`] recording a fixed fraction of traces.
///
/// The decision is a pure function of the trace id: the low 64 bits are
/// compared against a precomputed boundary, so the same id always yields the
/// same verdict on every node. Trace ids are assumed uniformly random.
#[derive(Clone, Debug)]
pub struct ProbabilisticSampler {
    sampling_rate: f64,
    boundary: u64,
}

impl ProbabilisticSampler {
    /// A sampler recording the given fraction of traces.
    ///
    /// Fails if `sampling_rate` is not within `[0.0, 1.0]`.
    pub fn new(sampling_rate: f64) -> Result<Self, TraceError> {
        if !(0.0..=1.0).contains(&sampling_rate) {
            return Err(TraceError::InvalidSamplingParam(format!(
                "sampling rate must be within [0.0, 1.0], got {}",
                sampling_rate
            )));
        }
        Ok(ProbabilisticSampler {
            sampling_rate,
            boundary: (sampling_rate * u64::MAX as f64) as u64,
        })
    }

    /// The configured sampling rate.
    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }
}

impl Sampler for ProbabilisticSampler {
    fn sample(&self, _operation_name: &str, trace_id: TraceId) -> SamplingResult {
        let sampled = self.sampling_rate >= 1.0 || trace_id.low() <= self.boundary;
        SamplingResult::new(sampled, SAMPLER_TYPE_PROBABILISTIC, self.sampling_rate)
    }
}

/// A [`Sampler`] bounding the rate of sampled traces.
///
/// Backed by a [`RateLimiter`] that starts with a full burst allowance of
/// `max_traces_per_second` permits (at least one, so sub-unit rates still
/// sample the first trace immediately).
#[derive(Debug)]
pub struct RateLimitingSampler {
    max_traces_per_second: f64,
    limiter: RateLimiter,
}

impl RateLimitingSampler {
    /// A sampler recording at most `max_traces_per_second` traces per second.
    pub fn new(max_traces_per_second: f64) -> Self {
        RateLimitingSampler {
            max_traces_per_second,
            limiter: RateLimiter::new(max_traces_per_second, max_traces_per_second.max(1.0)),
        }
    }

    /// The configured rate cap.
    pub fn max_traces_per_second(&self) -> f64 {
        self.max_traces_per_second
    }
}

impl Sampler for RateLimitingSampler {
    fn sample(&self, _operation_name: &str, trace_id: TraceId) -> SamplingResult {
        let _ = trace_id;
        let sampled = self.limiter.check_credit(1.0);
        SamplingResult::new(
            sampled,
            SAMPLER_TYPE_RATE_LIMITING,
            self.max_traces_per_second,
        )
    }
}
