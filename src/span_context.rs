use std::collections::HashMap;
use std::fmt;
use std::num::ParseIntError;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

/// Flags carried by a [`SpanContext`] across process boundaries.
///
/// Bit 0 is the `sampled` flag, bit 1 is the `debug` flag. The debug flag
/// forces downstream sampling regardless of the active sampler's decision and
/// is typically set by an operator for ad-hoc diagnosis.
#[derive(Clone, Debug, Default, PartialEq, Eq, Copy, Hash)]
pub struct TraceFlags(u8);

impl TraceFlags {
    /// Trace flags with the `sampled` flag set to `0`.
    pub const NOT_SAMPLED: TraceFlags = TraceFlags(0x00);

    /// Trace flags with the `sampled` flag set to `1`.
    ///
    /// Spans that are not sampled will be ignored by most tracing tools.
    pub const SAMPLED: TraceFlags = TraceFlags(0x01);

    /// Trace flags with the `debug` flag set to `1`.
    pub const DEBUG: TraceFlags = TraceFlags(0x02);

    /// Construct new trace flags.
    pub const fn new(flags: u8) -> Self {
        TraceFlags(flags)
    }

    /// Returns `true` if the `sampled` flag is set.
    pub fn is_sampled(&self) -> bool {
        (*self & TraceFlags::SAMPLED) == TraceFlags::SAMPLED
    }

    /// Returns `true` if the `debug` flag is set.
    pub fn is_debug(&self) -> bool {
        (*self & TraceFlags::DEBUG) == TraceFlags::DEBUG
    }

    /// Returns a copy of the current flags with the `sampled` flag set.
    pub fn with_sampled(&self, sampled: bool) -> Self {
        if sampled {
            *self | TraceFlags::SAMPLED
        } else {
            *self & !TraceFlags::SAMPLED
        }
    }

    /// Returns the flags as a `u8`.
    pub fn to_u8(self) -> u8 {
        self.0
    }
}

impl BitAnd for TraceFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for TraceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl Not for TraceFlags {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl fmt::LowerHex for TraceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A 16-byte value which identifies a given trace.
///
/// The id is valid if it contains at least one non-zero byte. Ids whose high
/// 64 bits are zero are "64-bit" trace ids; both widths are carried on the
/// wire.
#[derive(Clone, PartialEq, Eq, Copy, Hash)]
pub struct TraceId(u128);

impl TraceId {
    /// Invalid trace id
    pub const INVALID: TraceId = TraceId(0);

    /// Create a trace id from its representation as a byte array.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        TraceId(u128::from_be_bytes(bytes))
    }

    /// Return the representation of this trace id as a byte array.
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// The low 64 bits of the trace id.
    ///
    /// Sampling decisions and the B3 64-bit downgrade operate on this half.
    pub const fn low(self) -> u64 {
        self.0 as u64
    }

    /// The high 64 bits of the trace id; zero for 64-bit trace ids.
    pub const fn high(self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// Converts a string in base 16 to a trace id.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        u128::from_str_radix(hex, 16).map(TraceId)
    }

    /// The trace id as a `u128`.
    pub const fn to_u128(self) -> u128 {
        self.0
    }
}

impl From<u128> for TraceId {
    fn from(value: u128) -> Self {
        TraceId(value)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::LowerHex for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// An 8-byte value which identifies a given span.
///
/// The id is valid if it contains at least one non-zero byte.
#[derive(Clone, PartialEq, Eq, Copy, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// Invalid span id. As a parent id, this means "no parent".
    pub const INVALID: SpanId = SpanId(0);

    /// Create a span id from its representation as a byte array.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        SpanId(u64::from_be_bytes(bytes))
    }

    /// Return the representation of this span id as a byte array.
    pub const fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Converts a string in base 16 to a span id.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        u64::from_str_radix(hex, 16).map(SpanId)
    }

    /// The span id as a `u64`.
    pub const fn to_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        SpanId(value)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::LowerHex for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Immutable key-value pairs propagated with the trace context across process
/// boundaries, visible to all descendant spans.
///
/// Baggage never influences sampling decisions. Mutation produces a new
/// value; the underlying map is shared between clones.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Baggage(Option<Arc<HashMap<String, String>>>);

impl Baggage {
    /// An empty baggage map.
    pub fn new() -> Self {
        Baggage(None)
    }

    /// Build baggage from the given key-value collection.
    pub fn from_items<T, K, V>(items: T) -> Self
    where
        T: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = items
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if map.is_empty() {
            Baggage(None)
        } else {
            Baggage(Some(Arc::new(map)))
        }
    }

    /// Retrieves the value for a given key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .as_ref()
            .and_then(|items| items.get(key).map(String::as_str))
    }

    /// Returns a new baggage with the given item added or replaced.
    pub fn with_item<K, V>(&self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = self
            .0
            .as_ref()
            .map(|items| items.as_ref().clone())
            .unwrap_or_default();
        map.insert(key.into(), value.into());
        Baggage(Some(Arc::new(map)))
    }

    /// Iterate over all baggage items.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|items| items.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// The number of baggage items.
    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, |items| items.len())
    }

    /// Returns `true` if there are no baggage items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identity of a span, carried between in-process spans and serialized onto
/// wire carriers at RPC boundaries.
///
/// A context is immutable; adding a baggage item produces a new value. A
/// parent span id of zero means the span is a trace root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: SpanId,
    trace_flags: TraceFlags,
    baggage: Baggage,
}

impl SpanContext {
    /// Construct a new `SpanContext`.
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        parent_span_id: SpanId,
        trace_flags: TraceFlags,
        baggage: Baggage,
    ) -> Self {
        SpanContext {
            trace_id,
            span_id,
            parent_span_id,
            trace_flags,
            baggage,
        }
    }

    /// The [`TraceId`] for this span context.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The [`SpanId`] for this span context.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// The parent's [`SpanId`], or [`SpanId::INVALID`] for a root span.
    pub fn parent_span_id(&self) -> SpanId {
        self.parent_span_id
    }

    /// Returns details about the trace beyond its identity.
    pub fn trace_flags(&self) -> TraceFlags {
        self.trace_flags
    }

    /// Returns `true` if the span context has a valid (non-zero) `trace_id`
    /// and a valid (non-zero) `span_id`.
    pub fn is_valid(&self) -> bool {
        self.trace_id != TraceId::INVALID && self.span_id != SpanId::INVALID
    }

    /// Returns `true` if the `sampled` trace flag is set.
    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }

    /// Returns `true` if the `debug` trace flag is set.
    pub fn is_debug(&self) -> bool {
        self.trace_flags.is_debug()
    }

    /// A reference to the span context's [`Baggage`].
    pub fn baggage(&self) -> &Baggage {
        &self.baggage
    }

    /// Returns a new context carrying the given baggage item; everything
    /// else is unchanged.
    pub fn with_baggage_item<K, V>(&self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        SpanContext {
            baggage: self.baggage.with_item(key, value),
            ..self.clone()
        }
    }
}
