//! Runtime core of a Jaeger-compatible tracing client.
//!
//! This crate implements the machinery a tracer needs between "a span was
//! started" and "a span reached the backend":
//!
//! * **Sampling**: [`sampler`] holds the head-based samplers (const,
//!   probabilistic, rate limiting, per-operation) and a remotely controlled
//!   wrapper that hot-swaps strategies pushed by the collector.
//! * **Reporting**: [`reporter::RemoteReporter`] queues finished spans onto
//!   a bounded channel drained by a dedicated worker thread, so span
//!   transmission never blocks application code.
//! * **Propagation**: [`propagation`] carries span contexts across process
//!   boundaries in the native `uber-trace-id` format or the Zipkin B3
//!   format.
//!
//! Transports are injected: the reporter talks to a [`sender::Sender`] and
//! the remote sampler to a [`sampler::SamplingManager`], both supplied by
//! the host application. [`config::Config`] wires everything together from
//! builder setters or `JAEGER_*` environment variables.
//!
//! # Getting started
//!
//! ```
//! use jaeger_client_core::{Config, Reporter, SamplerType};
//! use jaeger_client_core::sender::InMemorySender;
//!
//! # fn main() -> jaeger_client_core::TraceResult<()> {
//! let config = Config::builder()
//!     .with_service_name("checkout")
//!     .with_sampler(SamplerType::Probabilistic, 0.01)
//!     .build()?;
//!
//! let sampler = config.sampler()?;
//! let sender = InMemorySender::new();
//! let reporter = config.reporter(Box::new(sender)).build()?;
//!
//! // ... hand sampler + reporter to the tracer ...
//! reporter.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_debug_implementations, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod metrics;
pub mod propagation;
pub mod reporter;
pub mod sampler;
pub mod sender;

mod error;
mod span;
mod span_context;

pub use config::{Config, ConfigBuilder, SamplerType};
pub use error::{TraceError, TraceResult};
pub use propagation::{B3Codec, Codec, Extractor, Injector, TextMapCodec};
pub use reporter::{RemoteReporter, Reporter};
pub use sampler::{Sampler, SamplingResult};
pub use span::{SpanData, TagValue};
pub use span_context::{Baggage, SpanContext, SpanId, TraceFlags, TraceId};
