use rand::Rng;
use std::fmt;
use std::num::ParseIntError;

/// A 64-bit trace identifier shared by every span in a trace.
///
/// Generated ids are uniformly random, so the all-zero id is legal but
/// avoided with overwhelming probability. Ids are never validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u64);

impl TraceId {
    /// The conventionally-invalid all-zero trace id.
    pub const INVALID: TraceId = TraceId(0);

    /// Generate a fresh random trace id.
    pub fn random() -> Self {
        TraceId(rand::rng().random())
    }

    /// Construct a trace id from a `u64`.
    pub const fn from_u64(value: u64) -> Self {
        TraceId(value)
    }

    /// Parse a trace id from a (possibly unpadded) hex string.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        u64::from_str_radix(hex.trim(), 16).map(TraceId)
    }

    /// The id as a `u64`.
    pub const fn to_u64(self) -> u64 {
        self.0
    }
}

/// Formats the trace id as unpadded lowercase hex, the propagation wire form.
impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::LowerHex for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A 64-bit identifier for a single span within a trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    /// The conventionally-invalid all-zero span id.
    pub const INVALID: SpanId = SpanId(0);

    /// Generate a fresh random span id.
    pub fn random() -> Self {
        SpanId(rand::rng().random())
    }

    /// Construct a span id from a `u64`.
    pub const fn from_u64(value: u64) -> Self {
        SpanId(value)
    }

    /// Parse a span id from a (possibly unpadded) hex string.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        u64::from_str_radix(hex.trim(), 16).map(SpanId)
    }

    /// The id as a `u64`.
    pub const fn to_u64(self) -> u64 {
        self.0
    }
}

/// Formats the span id as unpadded lowercase hex, the propagation wire form.
impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::LowerHex for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = TraceId::from_u64(0xdead_beef_cafe_f00d);
        assert_eq!(id.to_string(), "deadbeefcafef00d");
        assert_eq!(TraceId::from_hex(&id.to_string()).unwrap(), id);

        let id = SpanId::from_u64(0x1f);
        assert_eq!(id.to_string(), "1f");
        assert_eq!(SpanId::from_hex("1f").unwrap(), id);
    }

    #[test]
    fn invalid_hex_is_an_error() {
        assert!(TraceId::from_hex("not-hex").is_err());
        assert!(SpanId::from_hex("").is_err());
        // longer than 64 bits
        assert!(TraceId::from_hex("1ffffffffffffffff").is_err());
    }

    #[test]
    fn random_ids_differ() {
        // Not a statistical test, just a sanity check on the generator wiring.
        assert_ne!(TraceId::random(), TraceId::random());
        assert_ne!(SpanId::random(), SpanId::random());
    }
}
