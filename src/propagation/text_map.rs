use super::{parse_span_id, parse_trace_id, Codec, Extractor, Injector};
use crate::span_context::{Baggage, SpanContext, TraceFlags};

const DEFAULT_TRACE_HEADER: &str = "uber-trace-id";
const DEFAULT_BAGGAGE_PREFIX: &str = "uberctx-";

/// The native propagation format.
///
/// A single composite header carries the context as
/// `{traceIdHex}:{spanIdHex}:{parentIdHex}:{flags}`, ids in unpadded lower
/// hex and flags as the decimal value of the flags byte. Each baggage item
/// travels in its own header under a fixed prefix.
///
/// Extraction tolerates `%3A`-encoded separators, which some proxies produce
/// when they URL-encode header values.
#[derive(Clone, Debug)]
pub struct TextMapCodec {
    trace_header: String,
    baggage_prefix: String,
}

impl TextMapCodec {
    /// A codec using the `uber-trace-id` header and the `uberctx-` baggage
    /// prefix.
    pub fn new() -> Self {
        TextMapCodec {
            trace_header: DEFAULT_TRACE_HEADER.to_string(),
            baggage_prefix: DEFAULT_BAGGAGE_PREFIX.to_string(),
        }
    }

    /// A codec with custom header names. Empty strings fall back to the
    /// defaults.
    pub fn with_headers(trace_header: &str, baggage_prefix: &str) -> Self {
        TextMapCodec {
            trace_header: if trace_header.is_empty() {
                DEFAULT_TRACE_HEADER.to_string()
            } else {
                trace_header.to_lowercase()
            },
            baggage_prefix: if baggage_prefix.is_empty() {
                DEFAULT_BAGGAGE_PREFIX.to_string()
            } else {
                baggage_prefix.to_lowercase()
            },
        }
    }

    fn parse_context(&self, header_value: &str) -> Option<SpanContext> {
        let decoded = header_value.replace("%3A", ":");
        let mut parts = decoded.split(':');
        let trace_id = parse_trace_id(parts.next()?)?;
        let span_id = parse_span_id(parts.next()?)?;
        // The parent part is positional and required; "0" means a root span.
        let parent_span_id = parse_span_id(parts.next()?)?;
        let flags = parts.next()?.parse::<u8>().ok()?;
        if parts.next().is_some() {
            return None;
        }

        let context = SpanContext::new(
            trace_id,
            span_id,
            parent_span_id,
            TraceFlags::new(flags),
            Baggage::new(),
        );
        context.is_valid().then_some(context)
    }

    fn extract_baggage(&self, extractor: &dyn Extractor) -> Baggage {
        let items: Vec<(String, String)> = extractor
            .keys()
            .into_iter()
            .filter_map(|key| {
                let normalized = key.to_lowercase();
                let baggage_key = normalized.strip_prefix(&self.baggage_prefix)?;
                if baggage_key.is_empty() {
                    return None;
                }
                let value = extractor.get(key)?;
                Some((baggage_key.to_string(), value.to_string()))
            })
            .collect();
        Baggage::from_items(items)
    }
}

impl Default for TextMapCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for TextMapCodec {
    fn inject(&self, context: &SpanContext, injector: &mut dyn Injector) {
        injector.set(
            &self.trace_header,
            format!(
                "{:x}:{:x}:{:x}:{}",
                context.trace_id(),
                context.span_id(),
                context.parent_span_id(),
                context.trace_flags().to_u8()
            ),
        );
        for (key, value) in context.baggage().iter() {
            injector.set(&format!("{}{}", self.baggage_prefix, key), value.to_string());
        }
    }

    fn extract(&self, extractor: &dyn Extractor) -> Option<SpanContext> {
        let header_value = extractor.get(&self.trace_header)?;
        let context = self.parse_context(header_value)?;
        let baggage = self.extract_baggage(extractor);
        if baggage.is_empty() {
            Some(context)
        } else {
            Some(SpanContext::new(
                context.trace_id(),
                context.span_id(),
                context.parent_span_id(),
                context.trace_flags(),
                baggage,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span_context::{SpanId, TraceId};
    use std::collections::HashMap;

    fn codec() -> TextMapCodec {
        TextMapCodec::new()
    }

    fn context_with_baggage() -> SpanContext {
        SpanContext::new(
            TraceId::from(0x5f46_7fe7_bf42_676c_05e2_0ba4_a90e_448e_u128),
            SpanId::from(0x0102_0304_0506_0708_u64),
            SpanId::from(0x0011_2233_4455_6677_u64),
            TraceFlags::SAMPLED | TraceFlags::DEBUG,
            Baggage::from_items([("account", "abc"), ("request-id", "r-42")]),
        )
    }

    #[test]
    fn inject_writes_composite_header_and_baggage() {
        let mut carrier: HashMap<String, String> = HashMap::new();
        codec().inject(&context_with_baggage(), &mut carrier);

        assert_eq!(
            Extractor::get(&carrier, "uber-trace-id"),
            Some("5f467fe7bf42676c05e20ba4a90e448e:102030405060708:11223344556677:3")
        );
        assert_eq!(Extractor::get(&carrier, "uberctx-account"), Some("abc"));
        assert_eq!(Extractor::get(&carrier, "uberctx-request-id"), Some("r-42"));
    }

    #[test]
    fn round_trip_preserves_context() {
        let context = context_with_baggage();
        let mut carrier: HashMap<String, String> = HashMap::new();
        codec().inject(&context, &mut carrier);

        let extracted = codec().extract(&carrier).unwrap();
        assert_eq!(extracted, context);
    }

    #[test]
    fn round_trip_of_root_span_without_baggage() {
        let context = SpanContext::new(
            TraceId::from(0xdead_beef_u128),
            SpanId::from(0xcafe_u64),
            SpanId::INVALID,
            TraceFlags::NOT_SAMPLED,
            Baggage::new(),
        );
        let mut carrier: HashMap<String, String> = HashMap::new();
        codec().inject(&context, &mut carrier);
        assert_eq!(
            Extractor::get(&carrier, "uber-trace-id"),
            Some("deadbeef:cafe:0:0")
        );
        assert_eq!(codec().extract(&carrier).unwrap(), context);
    }

    #[test]
    fn extract_tolerates_url_encoded_separators() {
        let mut carrier: HashMap<String, String> = HashMap::new();
        carrier.insert(
            "uber-trace-id".to_string(),
            "deadbeef%3Acafe%3A0%3A1".to_string(),
        );
        let context = codec().extract(&carrier).unwrap();
        assert_eq!(context.trace_id(), TraceId::from(0xdead_beef_u128));
        assert!(context.is_sampled());
    }

    #[test]
    fn malformed_headers_extract_nothing() {
        let bad_values = [
            "",
            "deadbeef",
            "deadbeef:cafe:0",
            "deadbeef:cafe:0:1:extra",
            "xyz:cafe:0:1",
            "deadbeef:xyz:0:1",
            "deadbeef:cafe:xyz:1",
            "deadbeef:cafe:0:ff",
            "deadbeef:cafe:0:300",
            "DEADBEEF:cafe:0:1",
            "0:cafe:0:1",
            "deadbeef:0:0:1",
        ];
        for value in bad_values {
            let mut carrier: HashMap<String, String> = HashMap::new();
            carrier.insert("uber-trace-id".to_string(), value.to_string());
            assert!(
                codec().extract(&carrier).is_none(),
                "value {:?} must not extract",
                value
            );
        }
        assert!(codec().extract(&HashMap::new()).is_none());
    }

    #[test]
    fn custom_header_names() {
        let codec = TextMapCodec::with_headers("trace-context", "ctx-");
        let context = context_with_baggage();
        let mut carrier: HashMap<String, String> = HashMap::new();
        codec.inject(&context, &mut carrier);

        assert!(Extractor::get(&carrier, "trace-context").is_some());
        assert_eq!(Extractor::get(&carrier, "ctx-account"), Some("abc"));
        assert_eq!(codec.extract(&carrier).unwrap(), context);

        // Empty strings keep the defaults.
        let fallback = TextMapCodec::with_headers("", "");
        let mut carrier: HashMap<String, String> = HashMap::new();
        fallback.inject(&context, &mut carrier);
        assert!(Extractor::get(&carrier, "uber-trace-id").is_some());
    }
}
