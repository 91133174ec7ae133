//! Wire format of sampling-strategy responses served by the collector.

use serde::{Deserialize, Serialize};

use crate::TraceResult;

/// Which strategy a [`SamplingStrategyResponse`] carries.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SamplingStrategyType {
    #[default]
    Probabilistic,
    RateLimiting,
}

/// Parameters of a probabilistic strategy.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbabilisticSamplingStrategy {
    pub sampling_rate: f64,
}

/// Parameters of a rate-limiting strategy.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitingSamplingStrategy {
    pub max_traces_per_second: f64,
}

/// Probability override for a single operation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationSamplingStrategy {
    pub operation: String,
    pub probabilistic_sampling: ProbabilisticSamplingStrategy,
}

/// Per-operation strategy table with service-wide defaults.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerOperationSamplingStrategies {
    pub default_sampling_probability: f64,
    pub default_lower_bound_traces_per_second: f64,
    #[serde(default)]
    pub per_operation_strategies: Vec<OperationSamplingStrategy>,
}

/// A strategy response from the collector.
///
/// `strategy_type` names the service-wide strategy; a per-operation table,
/// when present, takes precedence over it.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SamplingStrategyResponse {
    #[serde(default)]
    pub strategy_type: SamplingStrategyType,
    pub probabilistic_sampling: Option<ProbabilisticSamplingStrategy>,
    pub rate_limiting_sampling: Option<RateLimitingSamplingStrategy>,
    pub operation_sampling: Option<PerOperationSamplingStrategies>,
}

impl SamplingStrategyResponse {
    /// Parse a response from its JSON wire form.
    pub fn from_json(body: &[u8]) -> TraceResult<Self> {
        serde_json::from_slice(body).map_err(|err| crate::TraceError::from(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_probabilistic_response() {
        let resp = SamplingStrategyResponse::from_json(
            br#"{
                "strategyType": "PROBABILISTIC",
                "probabilisticSampling": { "samplingRate": 0.42 }
            }"#,
        )
        .unwrap();
        assert_eq!(resp.strategy_type, SamplingStrategyType::Probabilistic);
        assert_eq!(
            resp.probabilistic_sampling,
            Some(ProbabilisticSamplingStrategy { sampling_rate: 0.42 })
        );
        assert!(resp.rate_limiting_sampling.is_none());
        assert!(resp.operation_sampling.is_none());
    }

    #[test]
    fn deserialize_per_operation_response() {
        let resp = SamplingStrategyResponse::from_json(
            br#"{
                "strategyType": "RATE_LIMITING",
                "rateLimitingSampling": { "maxTracesPerSecond": 5 },
                "operationSampling": {
                    "defaultSamplingProbability": 0.001,
                    "defaultLowerBoundTracesPerSecond": 0.0016,
                    "perOperationStrategies": [
                        {
                            "operation": "GET /users",
                            "probabilisticSampling": { "samplingRate": 1.0 }
                        }
                    ]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(resp.strategy_type, SamplingStrategyType::RateLimiting);
        let ops = resp.operation_sampling.unwrap();
        assert_eq!(ops.default_sampling_probability, 0.001);
        assert_eq!(ops.per_operation_strategies.len(), 1);
        assert_eq!(ops.per_operation_strategies[0].operation, "GET /users");
    }

    #[test]
    fn rejects_malformed_body() {
        assert!(SamplingStrategyResponse::from_json(b"not json").is_err());
        assert!(SamplingStrategyResponse::from_json(b"").is_err());
    }
}
