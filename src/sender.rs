//! Transport abstraction for finished spans.
//!
//! A [`Sender`] buffers spans into agent-sized batches and pushes them onto
//! the wire. The reporter owns exactly one sender and drives it from its
//! worker thread, so implementations get `&mut self` and need not be
//! internally synchronized.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::TraceResult;
use crate::span::SpanData;

/// Batches spans and transmits them to a collection endpoint.
///
/// Each method returns the number of spans flushed to the wire by that call,
/// so the reporter can attribute success counts to its metrics.
pub trait Sender: Send + fmt::Debug {
    /// Add a span to the current batch, transmitting it if the batch became
    /// full.
    fn append(&mut self, span: SpanData) -> TraceResult<usize>;

    /// Transmit any buffered spans immediately.
    fn flush(&mut self) -> TraceResult<usize>;

    /// Flush outstanding spans and release transport resources. The sender
    /// is not used again after this returns.
    fn close(&mut self) -> TraceResult<usize>;
}

/// A [`Sender`] that collects spans in memory instead of transmitting them.
///
/// Spans become visible through [`flushed_spans`](InMemorySender::flushed_spans)
/// only once flushed, mirroring the buffering behavior of a real transport.
/// Clones share the underlying storage.
#[derive(Clone, Debug, Default)]
pub struct InMemorySender {
    buffer: Arc<Mutex<Vec<SpanData>>>,
    flushed: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemorySender {
    /// Create a new sender with empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// All spans flushed so far, in flush order.
    pub fn flushed_spans(&self) -> Vec<SpanData> {
        self.flushed
            .lock()
            .map(|flushed| flushed.clone())
            .unwrap_or_default()
    }

    /// Clear both the pending buffer and the flushed spans.
    pub fn reset(&self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
        if let Ok(mut flushed) = self.flushed.lock() {
            flushed.clear();
        }
    }
}

impl Sender for InMemorySender {
    fn append(&mut self, span: SpanData) -> TraceResult<usize> {
        self.buffer.lock().map_err(crate::error::TraceError::from)?.push(span);
        Ok(0)
    }

    fn flush(&mut self) -> TraceResult<usize> {
        let mut buffer = self.buffer.lock().map_err(crate::error::TraceError::from)?;
        let count = buffer.len();
        if count > 0 {
            let mut flushed = self.flushed.lock().map_err(crate::error::TraceError::from)?;
            flushed.append(&mut buffer);
        }
        Ok(count)
    }

    fn close(&mut self) -> TraceResult<usize> {
        self.flush()
    }
}
