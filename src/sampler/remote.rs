use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::strategies::{SamplingStrategyResponse, SamplingStrategyType};
use super::{
    PerOperationSampler, ProbabilisticSampler, RateLimitingSampler, Sampler, SamplingResult,
};
use crate::metrics::TracerMetrics;
use crate::span_context::TraceId;
use crate::{TraceError, TraceResult};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_SAMPLING_RATE: f64 = 0.001;
const DEFAULT_MAX_OPERATIONS: usize = 2000;

/// Fetches the current sampling strategy for a service.
///
/// Implementations typically issue an HTTP request against the agent's
/// `/sampling?service=` endpoint; the transport is injected so the polling
/// machinery stays independent of any HTTP client.
pub trait SamplingManager: Send + Sync + fmt::Debug {
    /// Fetch the strategy the collector currently wants `service_name` to
    /// apply.
    fn sampling_strategy(&self, service_name: &str) -> TraceResult<SamplingStrategyResponse>;
}

/// The sampler currently installed by the poll loop.
#[derive(Debug)]
enum ActiveSampler {
    /// The caller-supplied initial sampler, before any strategy applied.
    Initial(Box<dyn Sampler>),
    Probabilistic(ProbabilisticSampler),
    RateLimiting(RateLimitingSampler),
    PerOperation(PerOperationSampler),
}

impl ActiveSampler {
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingResult {
        match self {
            ActiveSampler::Initial(sampler) => sampler.sample(operation_name, trace_id),
            ActiveSampler::Probabilistic(sampler) => sampler.sample(operation_name, trace_id),
            ActiveSampler::RateLimiting(sampler) => sampler.sample(operation_name, trace_id),
            ActiveSampler::PerOperation(sampler) => sampler.sample(operation_name, trace_id),
        }
    }
}

#[derive(Debug)]
struct Inner {
    service_name: String,
    manager: Box<dyn SamplingManager>,
    active: Mutex<ActiveSampler>,
    metrics: TracerMetrics,
    max_operations: usize,
}

impl Inner {
    fn poll_once(&self) {
        match self.manager.sampling_strategy(&self.service_name) {
            Ok(response) => {
                self.metrics.sampler_retrieved.incr(1);
                match self.apply(response) {
                    Ok(true) => self.metrics.sampler_updated.incr(1),
                    Ok(false) => {}
                    Err(err) => {
                        self.metrics.sampler_update_failure.incr(1);
                        tracing::warn!(
                            service = %self.service_name,
                            error = %err,
                            "failed to apply sampling strategy, keeping previous sampler"
                        );
                    }
                }
            }
            Err(err) => {
                // Fail open: the previous sampler keeps making decisions.
                self.metrics.sampler_query_failure.incr(1);
                tracing::warn!(
                    service = %self.service_name,
                    error = %err,
                    "sampling strategy query failed, keeping previous sampler"
                );
            }
        }
    }

    /// Install the sampler the response asks for. Returns `true` if the
    /// active sampler or its parameters changed.
    fn apply(&self, response: SamplingStrategyResponse) -> TraceResult<bool> {
        let mut active = self.active.lock()?;

        // A per-operation table takes precedence over the service-wide
        // strategy.
        if let Some(ops) = response.operation_sampling {
            if let ActiveSampler::PerOperation(sampler) = &*active {
                return sampler.update(&ops);
            }
            let sampler = PerOperationSampler::new(
                ops.default_sampling_probability,
                ops.default_lower_bound_traces_per_second,
                self.max_operations,
            )?;
            sampler.update(&ops)?;
            *active = ActiveSampler::PerOperation(sampler);
            return Ok(true);
        }

        match response.strategy_type {
            SamplingStrategyType::Probabilistic => {
                let rate = response
                    .probabilistic_sampling
                    .ok_or_else(|| {
                        TraceError::InvalidSamplingParam(
                            "probabilistic strategy without samplingRate".to_string(),
                        )
                    })?
                    .sampling_rate;
                if let ActiveSampler::Probabilistic(current) = &*active {
                    if current.sampling_rate() == rate {
                        return Ok(false);
                    }
                }
                *active = ActiveSampler::Probabilistic(ProbabilisticSampler::new(rate)?);
            }
            SamplingStrategyType::RateLimiting => {
                let rate = response
                    .rate_limiting_sampling
                    .ok_or_else(|| {
                        TraceError::InvalidSamplingParam(
                            "rate limiting strategy without maxTracesPerSecond".to_string(),
                        )
                    })?
                    .max_traces_per_second;
                if let ActiveSampler::RateLimiting(current) = &*active {
                    if current.max_traces_per_second() == rate {
                        return Ok(false);
                    }
                }
                *active = ActiveSampler::RateLimiting(RateLimitingSampler::new(rate));
            }
        }
        Ok(true)
    }
}

/// Builder for [`RemotelyControlledSampler`].
#[derive(Debug)]
pub struct RemotelyControlledSamplerBuilder<M> {
    service_name: String,
    manager: M,
    poll_interval: Duration,
    initial_sampler: Option<Box<dyn Sampler>>,
    max_operations: usize,
    metrics: TracerMetrics,
}

impl<M> RemotelyControlledSamplerBuilder<M>
where
    M: SamplingManager + 'static,
{
    /// How often to poll the manager. Defaults to 60 seconds.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The sampler used until the first successful strategy fetch. Defaults
    /// to a probabilistic sampler at rate 0.001.
    pub fn with_initial_sampler(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.initial_sampler = Some(sampler);
        self
    }

    /// Cap on the per-operation sampler table.
    pub fn with_max_operations(mut self, max_operations: usize) -> Self {
        self.max_operations = max_operations;
        self
    }

    /// Instruments for query and update outcomes.
    pub fn with_metrics(mut self, metrics: TracerMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Start the sampler and its polling thread. The first poll happens
    /// immediately.
    pub fn build(self) -> TraceResult<RemotelyControlledSampler> {
        let initial = match self.initial_sampler {
            Some(sampler) => ActiveSampler::Initial(sampler),
            None => ActiveSampler::Probabilistic(ProbabilisticSampler::new(
                DEFAULT_SAMPLING_RATE,
            )?),
        };

        let inner = Arc::new(Inner {
            service_name: self.service_name,
            manager: Box::new(self.manager),
            active: Mutex::new(initial),
            metrics: self.metrics,
            max_operations: self.max_operations,
        });

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let poll_interval = self.poll_interval;
        let worker = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("jaeger-sampler-poll".to_string())
                .spawn(move || loop {
                    inner.poll_once();
                    match shutdown_rx.recv_timeout(poll_interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                })
                .map_err(|err| TraceError::Other(Box::new(err)))?
        };

        Ok(RemotelyControlledSampler {
            inner,
            shutdown: shutdown_tx,
            worker: Mutex::new(Some(worker)),
        })
    }
}

/// A [`Sampler`] whose strategy is controlled by the collector.
///
/// A background thread polls a [`SamplingManager`] on a fixed interval and
/// hot-swaps the active sampler when the strategy changes. While the manager
/// is unreachable the previous sampler keeps deciding, so sampling never
/// stops because the control plane is down.
#[derive(Debug)]
pub struct RemotelyControlledSampler {
    inner: Arc<Inner>,
    shutdown: mpsc::Sender<()>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RemotelyControlledSampler {
    /// Start building a sampler for `service_name` polling the given
    /// manager.
    pub fn builder<M>(
        service_name: impl Into<String>,
        manager: M,
    ) -> RemotelyControlledSamplerBuilder<M>
    where
        M: SamplingManager + 'static,
    {
        RemotelyControlledSamplerBuilder {
            service_name: service_name.into(),
            manager,
            poll_interval: DEFAULT_POLL_INTERVAL,
            initial_sampler: None,
            max_operations: DEFAULT_MAX_OPERATIONS,
            metrics: TracerMetrics::noop(),
        }
    }

    #[cfg(test)]
    fn poll_now(&self) {
        self.inner.poll_once();
    }
}

impl Sampler for RemotelyControlledSampler {
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingResult {
        match self.inner.active.lock() {
            Ok(active) => active.sample(operation_name, trace_id),
            Err(_) => SamplingResult {
                sampled: false,
                tags: Vec::new(),
            },
        }
    }

    fn close(&self) {
        // Idempotent: a second close finds no worker to join.
        let _ = self.shutdown.send(());
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for RemotelyControlledSampler {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryMetricsFactory;
    use crate::sampler::strategies::{
        OperationSamplingStrategy, PerOperationSamplingStrategies, ProbabilisticSamplingStrategy,
        RateLimitingSamplingStrategy,
    };
    use crate::span::TagValue;

    /// Serves whatever response the test has installed; `None` fails the
    /// query. Polls are idempotent, so tests stay deterministic no matter
    /// how the background thread's own polls interleave.
    #[derive(Clone, Debug, Default)]
    struct SwitchableManager {
        response: Arc<Mutex<Option<SamplingStrategyResponse>>>,
    }

    impl SwitchableManager {
        fn serve(&self, response: SamplingStrategyResponse) {
            *self.response.lock().unwrap() = Some(response);
        }
    }

    impl SamplingManager for SwitchableManager {
        fn sampling_strategy(&self, _service: &str) -> TraceResult<SamplingStrategyResponse> {
            self.response
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| TraceError::from("sampling endpoint unreachable"))
        }
    }

    fn probabilistic_response(rate: f64) -> SamplingStrategyResponse {
        SamplingStrategyResponse {
            strategy_type: SamplingStrategyType::Probabilistic,
            probabilistic_sampling: Some(ProbabilisticSamplingStrategy { sampling_rate: rate }),
            ..Default::default()
        }
    }

    fn sampler_type_tag(result: &SamplingResult) -> &TagValue {
        &result.tags[0].1
    }

    fn build(manager: SwitchableManager) -> RemotelyControlledSampler {
        RemotelyControlledSampler::builder("test-service", manager)
            .with_poll_interval(Duration::from_secs(3600))
            .build()
            .unwrap()
    }

    #[test]
    fn swaps_to_rate_limiting_and_back() {
        let manager = SwitchableManager::default();
        manager.serve(SamplingStrategyResponse {
            strategy_type: SamplingStrategyType::RateLimiting,
            rate_limiting_sampling: Some(RateLimitingSamplingStrategy {
                max_traces_per_second: 100.0,
            }),
            ..Default::default()
        });
        let sampler = build(manager.clone());

        sampler.poll_now();
        let result = sampler.sample("op", TraceId::from(1u128));
        assert_eq!(sampler_type_tag(&result), &TagValue::from("ratelimiting"));

        manager.serve(probabilistic_response(1.0));
        sampler.poll_now();
        let result = sampler.sample("op", TraceId::from(1u128));
        assert_eq!(sampler_type_tag(&result), &TagValue::from("probabilistic"));
        assert!(result.sampled);

        sampler.close();
    }

    #[test]
    fn keeps_previous_sampler_on_query_failure() {
        let factory = InMemoryMetricsFactory::new();
        let sampler = RemotelyControlledSampler::builder(
            "test-service",
            SwitchableManager::default(),
        )
        .with_poll_interval(Duration::from_secs(3600))
        .with_initial_sampler(Box::new(super::super::ConstSampler::new(true)))
        .with_metrics(TracerMetrics::new(&factory))
        .build()
        .unwrap();

        sampler.poll_now();
        sampler.poll_now();

        // Still the initial sampler, every query metered as a failure.
        assert!(sampler.sample("op", TraceId::from(1u128)).sampled);
        assert!(factory.counter_value("jaeger.sampler-queries", &[("result", "err")]) >= 2);
        assert_eq!(
            factory.counter_value("jaeger.sampler-updates", &[("result", "ok")]),
            0
        );
        sampler.close();
    }

    #[test]
    fn per_operation_response_takes_precedence() {
        let manager = SwitchableManager::default();
        manager.serve(SamplingStrategyResponse {
            strategy_type: SamplingStrategyType::Probabilistic,
            probabilistic_sampling: Some(ProbabilisticSamplingStrategy { sampling_rate: 0.5 }),
            operation_sampling: Some(PerOperationSamplingStrategies {
                default_sampling_probability: 0.0,
                default_lower_bound_traces_per_second: 0.0,
                per_operation_strategies: vec![OperationSamplingStrategy {
                    operation: "always".to_string(),
                    probabilistic_sampling: ProbabilisticSamplingStrategy { sampling_rate: 1.0 },
                }],
            }),
            ..Default::default()
        });
        let sampler = build(manager);

        sampler.poll_now();
        assert!(matches!(
            &*sampler.inner.active.lock().unwrap(),
            ActiveSampler::PerOperation(_)
        ));
        assert!(sampler.sample("always", TraceId::from(u64::MAX as u128)).sampled);
        assert!(!sampler.sample("other", TraceId::from(u64::MAX as u128)).sampled);
        sampler.close();
    }

    #[test]
    fn unchanged_strategy_is_not_counted_as_update() {
        let factory = InMemoryMetricsFactory::new();
        let manager = SwitchableManager::default();
        manager.serve(probabilistic_response(0.5));
        let sampler = RemotelyControlledSampler::builder("test-service", manager)
            .with_poll_interval(Duration::from_secs(3600))
            .with_metrics(TracerMetrics::new(&factory))
            .build()
            .unwrap();

        // Only the first application is a change; repeats of the same
        // strategy are queries but not updates, however many polls run.
        sampler.poll_now();
        sampler.poll_now();
        sampler.poll_now();
        assert_eq!(
            factory.counter_value("jaeger.sampler-updates", &[("result", "ok")]),
            1
        );
        assert!(factory.counter_value("jaeger.sampler-queries", &[("result", "ok")]) >= 3);
        sampler.close();
    }

    #[test]
    fn close_is_idempotent() {
        let manager = SwitchableManager::default();
        manager.serve(probabilistic_response(1.0));
        let sampler = build(manager);
        sampler.close();
        sampler.close();
    }
}
