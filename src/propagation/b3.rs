use super::{parse_span_id, parse_trace_id, Codec, Extractor, Injector};
use crate::span_context::{Baggage, SpanContext, SpanId, TraceFlags, TraceId};

const B3_TRACE_ID_HEADER: &str = "x-b3-traceid";
const B3_SPAN_ID_HEADER: &str = "x-b3-spanid";
const B3_PARENT_SPAN_ID_HEADER: &str = "x-b3-parentspanid";
const B3_SAMPLED_HEADER: &str = "x-b3-sampled";
const B3_FLAGS_HEADER: &str = "x-b3-flags";

const DEFAULT_BAGGAGE_PREFIX: &str = "baggage-";

/// The Zipkin B3 propagation format.
///
/// Trace id, span id, parent id, sampled and debug travel in five separate
/// `X-B3-*` headers. Trace ids longer than 16 hex characters are downgraded
/// to their low 64 bits on extraction, matching the u64-wide readers common
/// in B3 deployments.
///
/// Extraction fails silently on malformed required headers; a malformed
/// parent id downgrades to a root span, since the header itself is optional.
#[derive(Clone, Debug)]
pub struct B3Codec {
    baggage_prefix: String,
}

impl B3Codec {
    /// A codec with the standard `baggage-` prefix.
    pub fn new() -> Self {
        B3Codec {
            baggage_prefix: DEFAULT_BAGGAGE_PREFIX.to_string(),
        }
    }

    /// A codec with a custom baggage prefix; an empty string keeps the
    /// default.
    pub fn with_baggage_prefix(prefix: &str) -> Self {
        B3Codec {
            baggage_prefix: if prefix.is_empty() {
                DEFAULT_BAGGAGE_PREFIX.to_string()
            } else {
                prefix.to_lowercase()
            },
        }
    }

    fn extract_trace_id(extractor: &dyn Extractor) -> Option<TraceId> {
        let value = extractor.get(B3_TRACE_ID_HEADER)?;
        let full = parse_trace_id(value)?;
        if value.len() > 16 {
            // Keep the low 64 bits, i.e. the rightmost 16 hex characters.
            Some(TraceId::from(full.low() as u128))
        } else {
            Some(full)
        }
    }

    fn extract_flags(extractor: &dyn Extractor) -> TraceFlags {
        // "1" in X-B3-Flags means debug, which implies sampled.
        if extractor.get(B3_FLAGS_HEADER) == Some("1") {
            return TraceFlags::DEBUG | TraceFlags::SAMPLED;
        }
        match extractor.get(B3_SAMPLED_HEADER) {
            Some(value) if value == "1" || value.eq_ignore_ascii_case("true") => {
                TraceFlags::SAMPLED
            }
            _ => TraceFlags::NOT_SAMPLED,
        }
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

impl Default for B3Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for B3Codec {
    fn inject(&self, context: &SpanContext, injector: &mut dyn Injector) {
        let trace_id = context.trace_id();
        if trace_id.high() != 0 {
            injector.set(B3_TRACE_ID_HEADER, format!("{:032x}", trace_id.to_u128()));
        } else {
            injector.set(B3_TRACE_ID_HEADER, format!("{:016x}", trace_id.low()));
        }
        injector.set(B3_SPAN_ID_HEADER, format!("{:016x}", context.span_id().to_u64()));
        if context.parent_span_id() != SpanId::INVALID {
            injector.set(
                B3_PARENT_SPAN_ID_HEADER,
                format!("{:016x}", context.parent_span_id().to_u64()),
            );
        }
        injector.set(
            B3_SAMPLED_HEADER,
            if context.is_sampled() { "1" } else { "0" }.to_string(),
        );
        if context.is_debug() {
            injector.set(B3_FLAGS_HEADER, "1".to_string());
        }
        for (key, value) in context.baggage().iter() {
            injector.set(&format!("{}{}", self.baggage_prefix, key), value.to_string());
        }
    }

    fn extract(&self, extractor: &dyn Extractor) -> Option<SpanContext> {
        let trace_id = Self::extract_trace_id(extractor)?;
        let span_id = parse_span_id(extractor.get(B3_SPAN_ID_HEADER)?)?;

        let parent_span_id = extractor
            .get(B3_PARENT_SPAN_ID_HEADER)
            .and_then(parse_span_id)
            .unwrap_or(SpanId::INVALID);

        let context = SpanContext::new(
            trace_id,
            span_id,
            parent_span_id,
            Self::extract_flags(extractor),
            self.extract_baggage(extractor),
        );
        context.is_valid().then_some(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn carrier(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn round_trip_preserves_context() {
        let context = SpanContext::new(
            TraceId::from(0x05e2_0ba4_a90e_448e_u128),
            SpanId::from(0x0102_0304_0506_0708_u64),
            SpanId::from(0x0011_2233_4455_6677_u64),
            TraceFlags::SAMPLED,
            Baggage::from_items([("account", "abc")]),
        );
        let codec = B3Codec::new();
        let mut carrier: HashMap<String, String> = HashMap::new();
        codec.inject(&context, &mut carrier);

        assert_eq!(
            Extractor::get(&carrier, "X-B3-TraceId"),
            Some("05e20ba4a90e448e")
        );
        assert_eq!(Extractor::get(&carrier, "X-B3-Sampled"), Some("1"));
        assert_eq!(Extractor::get(&carrier, "X-B3-Flags"), None);
        assert_eq!(codec.extract(&carrier).unwrap(), context);
    }

    #[test]
    fn debug_round_trip_sets_flags_header() {
        let context = SpanContext::new(
            TraceId::from(0xabc_u128),
            SpanId::from(0xdef_u64),
            SpanId::INVALID,
            TraceFlags::SAMPLED | TraceFlags::DEBUG,
            Baggage::new(),
        );
        let codec = B3Codec::new();
        let mut carrier: HashMap<String, String> = HashMap::new();
        codec.inject(&context, &mut carrier);

        assert_eq!(Extractor::get(&carrier, "X-B3-Flags"), Some("1"));
        let extracted = codec.extract(&carrier).unwrap();
        assert!(extracted.is_debug());
        assert!(extracted.is_sampled());
    }

    #[test]
    fn long_trace_id_downgrades_to_low_64_bits() {
        let map = carrier(&[
            ("x-b3-traceid", "463ac35c9f6413ad48485a3953bb6124"),
            ("x-b3-spanid", "48485a3953bb6124"),
            ("x-b3-sampled", "1"),
        ]);
        let context = B3Codec::new().extract(&map).unwrap();
        assert_eq!(context.trace_id(), TraceId::from(0x4848_5a39_53bb_6124_u128));
        assert_eq!(context.trace_id().high(), 0);
    }

    #[test]
    fn sampled_header_variants() {
        for (value, sampled) in [
            ("1", true),
            ("true", true),
            ("True", true),
            ("0", false),
            ("false", false),
            ("garbage", false),
        ] {
            let map = carrier(&[
                ("x-b3-traceid", "abc"),
                ("x-b3-spanid", "def"),
                ("x-b3-sampled", value),
            ]);
            let context = B3Codec::new().extract(&map).unwrap();
            assert_eq!(context.is_sampled(), sampled, "sampled value {:?}", value);
        }
    }

    #[test]
    fn absent_or_malformed_parent_means_root() {
        let map = carrier(&[("x-b3-traceid", "abc"), ("x-b3-spanid", "def")]);
        let context = B3Codec::new().extract(&map).unwrap();
        assert_eq!(context.parent_span_id(), SpanId::INVALID);

        let map = carrier(&[
            ("x-b3-traceid", "abc"),
            ("x-b3-spanid", "def"),
            ("x-b3-parentspanid", "not-hex"),
        ]);
        let context = B3Codec::new().extract(&map).unwrap();
        assert_eq!(context.parent_span_id(), SpanId::INVALID);
    }

    #[test]
    fn malicious_input_never_extracts() {
        let long = "f".repeat(56);
        let cases: Vec<Vec<(&str, &str)>> = vec![
            vec![],
            vec![("x-b3-traceid", "abc")],
            vec![("x-b3-spanid", "def")],
            vec![("x-b3-traceid", ""), ("x-b3-spanid", "def")],
            vec![("x-b3-traceid", "not-hex!"), ("x-b3-spanid", "def")],
            vec![("x-b3-traceid", "ABC"), ("x-b3-spanid", "def")],
            vec![("x-b3-traceid", &long), ("x-b3-spanid", "def")],
            vec![("x-b3-traceid", "abc"), ("x-b3-spanid", &long)],
            vec![("x-b3-traceid", "abc"), ("x-b3-spanid", "12345678901234567")],
            vec![("x-b3-traceid", "0"), ("x-b3-spanid", "def")],
            vec![("x-b3-traceid", "abc"), ("x-b3-spanid", "0")],
        ];
        for case in cases {
            let map = carrier(&case);
            assert!(
                B3Codec::new().extract(&map).is_none(),
                "case {:?} must not extract",
                case
            );
        }
    }

    #[test]
    fn custom_baggage_prefix() {
        let codec = B3Codec::with_baggage_prefix("ctx-");
        let context = SpanContext::new(
            TraceId::from(0xabc_u128),
            SpanId::from(0xdef_u64),
            SpanId::INVALID,
            TraceFlags::SAMPLED,
            Baggage::from_items([("tenant", "t1")]),
        );
        let mut map: HashMap<String, String> = HashMap::new();
        codec.inject(&context, &mut map);
        assert_eq!(Extractor::get(&map, "ctx-tenant"), Some("t1"));
        assert_eq!(
            codec.extract(&map).unwrap().baggage().get("tenant"),
            Some("t1")
        );
    }
}
