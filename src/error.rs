use std::sync::PoisonError;
use thiserror::Error;

/// A specialized `Result` type for tracing-core operations.
pub type TraceResult<T> = Result<T, TraceError>;

/// Errors returned by the tracing core.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceError {
    /// The component was already closed.
    #[error("component already closed")]
    AlreadyClosed,

    /// A sampler was constructed with an out-of-range parameter.
    #[error("invalid sampling parameter: {0}")]
    InvalidSamplingParam(String),

    /// Other errors not covered above.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<String> for TraceError {
    fn from(err_msg: String) -> Self {
        TraceError::Other(err_msg.into())
    }
}

impl From<&'static str> for TraceError {
    fn from(err_msg: &'static str) -> Self {
        TraceError::Other(Box::new(Custom(err_msg.into())))
    }
}

impl<T> From<PoisonError<T>> for TraceError {
    fn from(err: PoisonError<T>) -> Self {
        TraceError::Other(err.to_string().into())
    }
}

/// Wrap type for string
#[derive(Error, Debug)]
#[error("{0}")]
struct Custom(String);
