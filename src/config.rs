//! Tracer configuration.
//!
//! [`Config`] gathers the tuning values consumed by the samplers, the
//! reporter and the codecs. Values come from builder setters with
//! environment variables taking precedence when [`ConfigBuilder::from_env`]
//! is used; transports stay injected, so the config never opens a socket
//! itself.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::{MetricsFactory, NoopMetricsFactory, TracerMetrics};
use crate::propagation::{B3Codec, TextMapCodec};
use crate::reporter::{RemoteReporter, RemoteReporterBuilder};
use crate::sampler::{
    ConstSampler, ProbabilisticSampler, RateLimitingSampler, RemotelyControlledSampler, Sampler,
    SamplingManager,
};
use crate::sender::Sender;
use crate::{TraceError, TraceResult};

/// Service name reported with every span.
pub const ENV_SERVICE_NAME: &str = "JAEGER_SERVICE_NAME";
/// Sampler type: `const`, `probabilistic`, `ratelimiting` or `remote`.
pub const ENV_SAMPLER_TYPE: &str = "JAEGER_SAMPLER_TYPE";
/// Numeric sampler parameter; meaning depends on the sampler type.
pub const ENV_SAMPLER_PARAM: &str = "JAEGER_SAMPLER_PARAM";
/// Remote sampler poll interval in milliseconds.
pub const ENV_SAMPLER_REFRESH_INTERVAL: &str = "JAEGER_SAMPLER_REFRESH_INTERVAL";
/// Reporter flush interval in milliseconds.
pub const ENV_REPORTER_FLUSH_INTERVAL: &str = "JAEGER_REPORTER_FLUSH_INTERVAL";
/// Reporter queue capacity in spans.
pub const ENV_REPORTER_MAX_QUEUE_SIZE: &str = "JAEGER_REPORTER_MAX_QUEUE_SIZE";

const DEFAULT_SAMPLER_PARAM: f64 = 0.001;
const DEFAULT_SAMPLER_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_REPORTER_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_REPORTER_MAX_QUEUE_SIZE: usize = 100;
const DEFAULT_CLOSE_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Which sampling strategy the tracer starts with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SamplerType {
    Const,
    Probabilistic,
    RateLimiting,
    /// Remotely controlled, with a probabilistic sampler until the first
    /// strategy fetch.
    #[default]
    Remote,
}

impl FromStr for SamplerType {
    type Err = TraceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "const" => Ok(SamplerType::Const),
            "probabilistic" => Ok(SamplerType::Probabilistic),
            "ratelimiting" => Ok(SamplerType::RateLimiting),
            "remote" => Ok(SamplerType::Remote),
            other => Err(TraceError::InvalidSamplingParam(format!(
                "unknown sampler type {:?}",
                other
            ))),
        }
    }
}

/// Builder for [`Config`].
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    service_name: Option<String>,
    sampler_type: SamplerType,
    sampler_param: f64,
    sampler_refresh_interval: Duration,
    reporter_flush_interval: Duration,
    reporter_max_queue_size: usize,
    close_enqueue_timeout: Duration,
    trace_header_name: String,
    baggage_prefix: String,
    b3_baggage_prefix: String,
    metrics_factory: Arc<dyn MetricsFactory>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder {
            service_name: None,
            sampler_type: SamplerType::default(),
            sampler_param: DEFAULT_SAMPLER_PARAM,
            sampler_refresh_interval: DEFAULT_SAMPLER_REFRESH_INTERVAL,
            reporter_flush_interval: DEFAULT_REPORTER_FLUSH_INTERVAL,
            reporter_max_queue_size: DEFAULT_REPORTER_MAX_QUEUE_SIZE,
            close_enqueue_timeout: DEFAULT_CLOSE_ENQUEUE_TIMEOUT,
            trace_header_name: String::new(),
            baggage_prefix: String::new(),
            b3_baggage_prefix: String::new(),
            metrics_factory: Arc::new(NoopMetricsFactory),
        }
    }
}

impl ConfigBuilder {
    /// A builder seeded from the `JAEGER_*` environment variables.
    ///
    /// Unset variables keep their defaults; present-but-invalid values are
    /// logged and ignored, so a typo in deployment config cannot take the
    /// tracer down.
    pub fn from_env() -> Self {
        let mut builder = ConfigBuilder::default();
        if let Some(name) = read_env(ENV_SERVICE_NAME) {
            builder.service_name = Some(name);
        }
        if let Some(value) = read_env(ENV_SAMPLER_TYPE) {
            match value.parse() {
                Ok(sampler_type) => builder.sampler_type = sampler_type,
                Err(_) => warn_invalid(ENV_SAMPLER_TYPE, &value),
            }
        }
        if let Some(value) = read_env(ENV_SAMPLER_PARAM) {
            match value.parse::<f64>() {
                Ok(param) => builder.sampler_param = param,
                Err(_) => warn_invalid(ENV_SAMPLER_PARAM, &value),
            }
        }
        if let Some(interval) = read_env_millis(ENV_SAMPLER_REFRESH_INTERVAL) {
            builder.sampler_refresh_interval = interval;
        }
        if let Some(interval) = read_env_millis(ENV_REPORTER_FLUSH_INTERVAL) {
            builder.reporter_flush_interval = interval;
        }
        if let Some(value) = read_env(ENV_REPORTER_MAX_QUEUE_SIZE) {
            match value.parse::<usize>() {
                Ok(size) if size > 0 => builder.reporter_max_queue_size = size,
                _ => warn_invalid(ENV_REPORTER_MAX_QUEUE_SIZE, &value),
            }
        }
        builder
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn with_sampler(mut self, sampler_type: SamplerType, param: f64) -> Self {
        self.sampler_type = sampler_type;
        self.sampler_param = param;
        self
    }

    pub fn with_sampler_refresh_interval(mut self, interval: Duration) -> Self {
        self.sampler_refresh_interval = interval;
        self
    }

    pub fn with_reporter_flush_interval(mut self, interval: Duration) -> Self {
        self.reporter_flush_interval = interval;
        self
    }

    pub fn with_reporter_max_queue_size(mut self, size: usize) -> Self {
        self.reporter_max_queue_size = size;
        self
    }

    pub fn with_close_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.close_enqueue_timeout = timeout;
        self
    }

    /// Header name for the native codec; empty keeps `uber-trace-id`.
    pub fn with_trace_header_name(mut self, name: impl Into<String>) -> Self {
        self.trace_header_name = name.into();
        self
    }

    /// Baggage prefix for the native codec; empty keeps `uberctx-`.
    pub fn with_baggage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.baggage_prefix = prefix.into();
        self
    }

    /// Baggage prefix for the B3 codec; empty keeps `baggage-`.
    pub fn with_b3_baggage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.b3_baggage_prefix = prefix.into();
        self
    }

    pub fn with_metrics_factory(mut self, factory: Arc<dyn MetricsFactory>) -> Self {
        self.metrics_factory = factory;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> TraceResult<Config> {
        let service_name = match self.service_name {
            Some(name) if !name.trim().is_empty() => name,
            _ => {
                return Err(TraceError::from(
                    "service name is required; set it explicitly or via JAEGER_SERVICE_NAME",
                ))
            }
        };
        Ok(Config {
            service_name,
            sampler_type: self.sampler_type,
            sampler_param: self.sampler_param,
            sampler_refresh_interval: self.sampler_refresh_interval,
            reporter_flush_interval: self.reporter_flush_interval,
            reporter_max_queue_size: self.reporter_max_queue_size,
            close_enqueue_timeout: self.close_enqueue_timeout,
            trace_header_name: self.trace_header_name,
            baggage_prefix: self.baggage_prefix,
            b3_baggage_prefix: self.b3_baggage_prefix,
            metrics_factory: self.metrics_factory,
        })
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn read_env_millis(name: &str) -> Option<Duration> {
    let value = read_env(name)?;
    match value.parse::<u64>() {
        Ok(millis) => Some(Duration::from_millis(millis)),
        Err(_) => {
            warn_invalid(name, &value);
            None
        }
    }
}

fn warn_invalid(name: &str, value: &str) {
    tracing::warn!(var = name, value, "invalid environment value, using default");
}

/// Immutable tracer configuration; factory for the runtime components.
#[derive(Clone, Debug)]
pub struct Config {
    service_name: String,
    sampler_type: SamplerType,
    sampler_param: f64,
    sampler_refresh_interval: Duration,
    reporter_flush_interval: Duration,
    reporter_max_queue_size: usize,
    close_enqueue_timeout: Duration,
    trace_header_name: String,
    baggage_prefix: String,
    b3_baggage_prefix: String,
    metrics_factory: Arc<dyn MetricsFactory>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn sampler_type(&self) -> SamplerType {
        self.sampler_type
    }

    pub fn sampler_param(&self) -> f64 {
        self.sampler_param
    }

    pub fn reporter_max_queue_size(&self) -> usize {
        self.reporter_max_queue_size
    }

    /// Build the configured sampler.
    ///
    /// The remote type needs a [`SamplingManager`]; use
    /// [`remote_sampler`](Config::remote_sampler) for it.
    pub fn sampler(&self) -> TraceResult<Box<dyn Sampler>> {
        match self.sampler_type {
            SamplerType::Const => Ok(Box::new(ConstSampler::new(self.sampler_param >= 1.0))),
            SamplerType::Probabilistic => {
                Ok(Box::new(ProbabilisticSampler::new(self.sampler_param)?))
            }
            SamplerType::RateLimiting => {
                Ok(Box::new(RateLimitingSampler::new(self.sampler_param)))
            }
            SamplerType::Remote => Err(TraceError::from(
                "remote sampler requires a SamplingManager",
            )),
        }
    }

    /// Build a remotely controlled sampler polling the given manager,
    /// starting from a probabilistic sampler at the configured param.
    pub fn remote_sampler<M>(&self, manager: M) -> TraceResult<RemotelyControlledSampler>
    where
        M: SamplingManager + 'static,
    {
        let initial = ProbabilisticSampler::new(self.sampler_param)?;
        RemotelyControlledSampler::builder(self.service_name.clone(), manager)
            .with_poll_interval(self.sampler_refresh_interval)
            .with_initial_sampler(Box::new(initial))
            .with_metrics(TracerMetrics::new(self.metrics_factory.as_ref()))
            .build()
    }

    /// Builder for a reporter around the given sender, preconfigured from
    /// this config.
    pub fn reporter(&self, sender: Box<dyn Sender>) -> RemoteReporterBuilder {
        RemoteReporter::builder(sender)
            .with_max_queue_size(self.reporter_max_queue_size)
            .with_flush_interval(self.reporter_flush_interval)
            .with_close_enqueue_timeout(self.close_enqueue_timeout)
            .with_metrics(TracerMetrics::new(self.metrics_factory.as_ref()))
    }

    /// The native propagation codec with the configured header names.
    pub fn text_map_codec(&self) -> TextMapCodec {
        TextMapCodec::with_headers(&self.trace_header_name, &self.baggage_prefix)
    }

    /// The B3 propagation codec with the configured baggage prefix.
    pub fn b3_codec(&self) -> B3Codec {
        B3Codec::with_baggage_prefix(&self.b3_baggage_prefix)
    }
}
