//! Trace and span identifiers.
//!
//! Both ids are fixed-width byte arrays rendered as lowercase hex on the wire.
//! The all-zero value is reserved as "invalid" by W3C Trace Context, so the
//! generators never produce it and the parsers reject it.

use std::fmt;

/// A 16-byte trace identifier shared by every span of one trace.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct TraceId([u8; 16]);

/// An 8-byte identifier unique to one span within its trace.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct SpanId([u8; 8]);

impl TraceId {
    pub const INVALID: Self = Self([0; 16]);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    /// A fresh random, non-zero id.
    pub fn random() -> Self {
        Self(fastrand::u128(1..).to_be_bytes())
    }

    /// Parses exactly 32 lowercase hex digits. Returns `None` for anything
    /// else, including the all-zero id.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = decode_hex::<16>(s)?;
        let id = Self(bytes);
        (id != Self::INVALID).then_some(id)
    }
}

impl SpanId {
    pub const INVALID: Self = Self([0; 8]);

    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 8] {
        self.0
    }

    /// A fresh random, non-zero id.
    pub fn random() -> Self {
        Self(fastrand::u64(1..).to_be_bytes())
    }

    /// Parses exactly 16 lowercase hex digits. Returns `None` for anything
    /// else, including the all-zero id.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = decode_hex::<8>(s)?;
        let id = Self(bytes);
        (id != Self::INVALID).then_some(id)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

/// The 8-bit `trace-flags` field. Only the sampled bit is defined.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct TraceFlags(u8);

impl TraceFlags {
    pub const NOT_SAMPLED: Self = Self(0x00);
    pub const SAMPLED: Self = Self(0x01);

    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_sampled(self) -> bool {
        self.0 & Self::SAMPLED.0 == Self::SAMPLED.0
    }

    pub const fn with_sampled(self, sampled: bool) -> Self {
        if sampled {
            Self(self.0 | Self::SAMPLED.0)
        } else {
            Self(self.0 & !Self::SAMPLED.0)
        }
    }
}

impl fmt::Display for TraceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

/// Decodes `2 * N` lowercase hex digits. Uppercase is rejected: W3C Trace
/// Context only permits lowercase in `traceparent`.
pub(crate) fn decode_hex<const N: usize>(s: &str) -> Option<[u8; N]> {
    let raw = s.as_bytes();
    if raw.len() != N * 2 {
        return None;
    }
    let mut out = [0u8; N];
    for (i, pair) in raw.chunks_exact(2).enumerate() {
        out[i] = (nibble(pair[0])? << 4) | nibble(pair[1])?;
    }
    Some(out)
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}
