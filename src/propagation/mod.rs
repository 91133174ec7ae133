//! Context propagation across process boundaries.
//!
//! A [`Codec`] writes a [`SpanContext`] into a wire carrier on the client
//! side of an RPC and reads it back on the server side. Carriers are
//! abstracted behind [`Injector`] and [`Extractor`], so the same codec works
//! over HTTP headers, message attributes or anything else key-value shaped.
//!
//! Extraction never fails loudly: malformed input yields `None` and the
//! caller starts a fresh root trace.

use std::collections::HashMap;

use crate::span_context::SpanContext;

mod b3;
mod text_map;

pub use b3::B3Codec;
pub use text_map::TextMapCodec;

/// Write-only access to a wire carrier.
pub trait Injector {
    /// Set a key-value pair on the carrier, replacing any previous value.
    fn set(&mut self, key: &str, value: String);
}

/// Read-only access to a wire carrier.
///
/// Header names are matched case-insensitively; implementations backed by
/// case-sensitive maps should normalize on insert.
pub trait Extractor {
    /// Get the value of the given key, if present.
    fn get(&self, key: &str) -> Option<&str>;

    /// All keys present on the carrier.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }
}

/// Strict lower-hex check; `from_str_radix` alone would admit signs and
/// uppercase, which the wire formats forbid.
pub(crate) fn is_lower_hex(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Parse a 1 to 32 character lower-hex trace id, keeping all 128 bits.
pub(crate) fn parse_trace_id(value: &str) -> Option<crate::span_context::TraceId> {
    if is_lower_hex(value) && value.len() <= 32 {
        u128::from_str_radix(value, 16)
            .ok()
            .map(crate::span_context::TraceId::from)
    } else {
        None
    }
}

/// Parse a 1 to 16 character lower-hex span id.
pub(crate) fn parse_span_id(value: &str) -> Option<crate::span_context::SpanId> {
    if is_lower_hex(value) && value.len() <= 16 {
        u64::from_str_radix(value, 16)
            .ok()
            .map(crate::span_context::SpanId::from)
    } else {
        None
    }
}

/// Serializes span contexts onto wire carriers and back.
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// Write `context` into the carrier.
    fn inject(&self, context: &SpanContext, injector: &mut dyn Injector);

    /// Read a context from the carrier. Returns `None` when no context is
    /// present or the present one is malformed.
    fn extract(&self, extractor: &dyn Extractor) -> Option<SpanContext>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_carrier_is_case_insensitive() {
        let mut carrier = HashMap::new();
        Injector::set(&mut carrier, "Uber-Trace-Id", "abc".to_string());
        assert_eq!(Extractor::get(&carrier, "UBER-TRACE-ID"), Some("abc"));
        assert_eq!(Extractor::get(&carrier, "uber-trace-id"), Some("abc"));
        assert_eq!(Extractor::get(&carrier, "other"), None);
        assert_eq!(Extractor::keys(&carrier), vec!["uber-trace-id"]);
    }
}
