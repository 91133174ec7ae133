use std::collections::HashMap;
use std::sync::Mutex;

use super::rate_limiter::RateLimiter;
use super::strategies::PerOperationSamplingStrategies;
use super::{
    ProbabilisticSampler, Sampler, SamplingResult, SAMPLER_PARAM_TAG_KEY, SAMPLER_TYPE_LOWER_BOUND,
    SAMPLER_TYPE_TAG_KEY,
};
use crate::span_context::TraceId;
use crate::TraceResult;

/// Combines a probabilistic sampler with a rate-limited floor.
///
/// A trace is sampled when the probabilistic sampler says so; otherwise the
/// lower-bound limiter may still admit it, guaranteeing a minimum throughput
/// for low-traffic operations. Lower-bound admissions are tagged
/// `lowerbound` so the backend does not extrapolate them as probabilistic
/// data.
#[derive(Debug)]
pub struct GuaranteedThroughputSampler {
    probabilistic: ProbabilisticSampler,
    lower_bound: f64,
    limiter: RateLimiter,
}

impl GuaranteedThroughputSampler {
    /// A sampler with the given probability and a floor of
    /// `lower_bound` traces per second.
    pub fn new(sampling_rate: f64, lower_bound: f64) -> TraceResult<Self> {
        Ok(GuaranteedThroughputSampler {
            probabilistic: ProbabilisticSampler::new(sampling_rate)?,
            lower_bound,
            limiter: RateLimiter::new(lower_bound, 1.0),
        })
    }

    /// Replace the probability and floor. The limiter's accumulated balance
    /// carries over proportionally. Returns `true` if either parameter
    /// changed.
    pub fn update(&mut self, sampling_rate: f64, lower_bound: f64) -> TraceResult<bool> {
        let mut changed = false;
        if self.probabilistic.sampling_rate() != sampling_rate {
            self.probabilistic = ProbabilisticSampler::new(sampling_rate)?;
            changed = true;
        }
        if self.lower_bound != lower_bound {
            self.limiter.update(lower_bound, 1.0);
            self.lower_bound = lower_bound;
            changed = true;
        }
        Ok(changed)
    }

    pub(crate) fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingResult {
        let result = self.probabilistic.sample(operation_name, trace_id);
        if result.sampled {
            // Keep the limiter drained while probabilistic sampling is
            // active, so the floor only tops up genuinely quiet periods.
            self.limiter.check_credit(1.0);
            return result;
        }

        let sampled = self.limiter.check_credit(1.0);
        SamplingResult {
            sampled,
            tags: vec![
                (SAMPLER_TYPE_TAG_KEY, SAMPLER_TYPE_LOWER_BOUND.into()),
                (SAMPLER_PARAM_TAG_KEY, self.lower_bound.into()),
            ],
        }
    }
}

#[derive(Debug)]
struct PerOperationState {
    default: ProbabilisticSampler,
    lower_bound: f64,
    samplers: HashMap<String, GuaranteedThroughputSampler>,
}

/// A [`Sampler`] keeping an independent [`GuaranteedThroughputSampler`] per
/// operation name.
///
/// Operations appear in the table lazily on first sight, up to
/// `max_operations`; past the cap, unknown operations fall back to the
/// default probabilistic sampler so the table cannot grow without bound
/// under a cardinality explosion.
#[derive(Debug)]
pub struct PerOperationSampler {
    max_operations: usize,
    state: Mutex<PerOperationState>,
}

impl PerOperationSampler {
    /// A sampler with the given default probability, per-operation floor and
    /// operation-table cap.
    pub fn new(
        default_sampling_rate: f64,
        lower_bound: f64,
        max_operations: usize,
    ) -> TraceResult<Self> {
        Ok(PerOperationSampler {
            max_operations,
            state: Mutex::new(PerOperationState {
                default: ProbabilisticSampler::new(default_sampling_rate)?,
                lower_bound,
                samplers: HashMap::new(),
            }),
        })
    }

    /// Apply a remote per-operation strategy.
    ///
    /// Known operations are updated in place, new ones inserted up to the
    /// cap. Returns `true` if any parameter changed. Entries for operations
    /// absent from the strategy are kept as-is.
    pub fn update(&self, strategies: &PerOperationSamplingStrategies) -> TraceResult<bool> {
        let mut state = self.state.lock()?;
        let mut changed = false;

        if state.default.sampling_rate() != strategies.default_sampling_probability {
            state.default = ProbabilisticSampler::new(strategies.default_sampling_probability)?;
            changed = true;
        }
        if state.lower_bound != strategies.default_lower_bound_traces_per_second {
            state.lower_bound = strategies.default_lower_bound_traces_per_second;
            changed = true;
        }
        let lower_bound = state.lower_bound;

        for op in &strategies.per_operation_strategies {
            let rate = op.probabilistic_sampling.sampling_rate;
            if let Some(sampler) = state.samplers.get_mut(&op.operation) {
                changed |= sampler.update(rate, lower_bound)?;
            } else if state.samplers.len() < self.max_operations {
                state.samplers.insert(
                    op.operation.clone(),
                    GuaranteedThroughputSampler::new(rate, lower_bound)?,
                );
                changed = true;
            }
        }
        Ok(changed)
    }
}

impl Sampler for PerOperationSampler {
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingResult {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            // A poisoned lock means a panic elsewhere; fail closed.
            Err(_) => {
                return SamplingResult {
                    sampled: false,
                    tags: Vec::new(),
                }
            }
        };

        if let Some(sampler) = state.samplers.get(operation_name) {
            return sampler.sample(operation_name, trace_id);
        }

        if state.samplers.len() < self.max_operations {
            let default_rate = state.default.sampling_rate();
            let lower_bound = state.lower_bound;
            if let Ok(sampler) = GuaranteedThroughputSampler::new(default_rate, lower_bound) {
                let result = sampler.sample(operation_name, trace_id);
                state.samplers.insert(operation_name.to_string(), sampler);
                return result;
            }
        }

        state.default.sample(operation_name, trace_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::strategies::{
        OperationSamplingStrategy, ProbabilisticSamplingStrategy,
    };
    use crate::span::TagValue;

    fn trace_id(low: u64) -> TraceId {
        TraceId::from(low as u128)
    }

    #[test]
    fn guaranteed_throughput_tags_reflect_deciding_sampler() {
        // Probability 1.0: always the probabilistic verdict.
        let sampler = GuaranteedThroughputSampler::new(1.0, 1.0).unwrap();
        let result = sampler.sample("op", trace_id(u64::MAX));
        assert!(result.sampled);
        assert_eq!(result.tags[0].1, TagValue::from("probabilistic"));

        // Probability 0.0: only the lower bound can admit, and it tags
        // itself as such.
        let sampler = GuaranteedThroughputSampler::new(0.0, 1.0).unwrap();
        let result = sampler.sample("op", trace_id(u64::MAX));
        assert!(result.sampled);
        assert_eq!(result.tags[0].1, TagValue::from("lowerbound"));
        assert_eq!(result.tags[1].1, TagValue::from(1.0));

        // The floor's burst is spent; the next trace is dropped.
        assert!(!sampler.sample("op", trace_id(u64::MAX)).sampled);
    }

    #[test]
    fn per_operation_tracks_operations_up_to_cap() {
        let sampler = PerOperationSampler::new(1.0, 1.0, 2).unwrap();

        assert!(sampler.sample("a", trace_id(1)).sampled);
        assert!(sampler.sample("b", trace_id(1)).sampled);
        // Third distinct operation exceeds the cap and uses the shared
        // default sampler instead of a dedicated entry.
        let result = sampler.sample("c", trace_id(1));
        assert!(result.sampled);
        assert_eq!(result.tags[0].1, TagValue::from("probabilistic"));

        let state = sampler.state.lock().unwrap();
        assert_eq!(state.samplers.len(), 2);
        assert!(state.samplers.contains_key("a"));
        assert!(state.samplers.contains_key("b"));
        assert!(!state.samplers.contains_key("c"));
    }

    #[test]
    fn update_applies_remote_strategies() {
        let sampler = PerOperationSampler::new(0.5, 1.0, 10).unwrap();
        assert!(sampler.sample("known", trace_id(1)).sampled);

        let strategies = PerOperationSamplingStrategies {
            default_sampling_probability: 0.25,
            default_lower_bound_traces_per_second: 2.0,
            per_operation_strategies: vec![
                OperationSamplingStrategy {
                    operation: "known".to_string(),
                    probabilistic_sampling: ProbabilisticSamplingStrategy { sampling_rate: 1.0 },
                },
                OperationSamplingStrategy {
                    operation: "new".to_string(),
                    probabilistic_sampling: ProbabilisticSamplingStrategy { sampling_rate: 0.0 },
                },
            ],
        };

        assert!(sampler.update(&strategies).unwrap());
        {
            let state = sampler.state.lock().unwrap();
            assert_eq!(state.default.sampling_rate(), 0.25);
            assert_eq!(state.lower_bound, 2.0);
            assert_eq!(
                state.samplers["known"].probabilistic.sampling_rate(),
                1.0
            );
            assert_eq!(state.samplers["new"].probabilistic.sampling_rate(), 0.0);
        }

        // Re-applying the identical strategy is a no-op.
        assert!(!sampler.update(&strategies).unwrap());
    }

    #[test]
    fn lower_bound_only_update_reaches_existing_entries() {
        let sampler = PerOperationSampler::new(0.0, 1000.0, 10).unwrap();
        // First sight admits through the floor and creates the entry.
        assert!(sampler.sample("op", trace_id(1)).sampled);

        // Only the lower bound changes; the operation's rate stays 0.0.
        let strategies = PerOperationSamplingStrategies {
            default_sampling_probability: 0.0,
            default_lower_bound_traces_per_second: 0.0,
            per_operation_strategies: vec![OperationSamplingStrategy {
                operation: "op".to_string(),
                probabilistic_sampling: ProbabilisticSamplingStrategy { sampling_rate: 0.0 },
            }],
        };
        assert!(sampler.update(&strategies).unwrap());

        // The old 1000/s floor would refill within milliseconds; with the
        // floor removed even a waited-out entry admits nothing.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!sampler.sample("op", trace_id(1)).sampled);
    }

    #[test]
    fn update_rejects_invalid_probability() {
        let sampler = PerOperationSampler::new(0.5, 1.0, 10).unwrap();
        let strategies = PerOperationSamplingStrategies {
            default_sampling_probability: 1.5,
            default_lower_bound_traces_per_second: 1.0,
            per_operation_strategies: Vec::new(),
        };
        assert!(sampler.update(&strategies).is_err());
    }
}
