//! W3C Baggage: user key/value pairs propagated next to the trace context.
//!
//! Header format: `key1=value1;prop,key2=value2`. Values are percent-encoded
//! on the wire. Member properties (everything after the first `;`) are kept
//! verbatim and not interpreted.

/// Upper bound on list members accepted from one header.
const MAX_MEMBERS: usize = 180;
/// Upper bound on the serialized header size.
const MAX_BYTES: usize = 8192;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BaggageEntry {
    pub value: String,
    pub metadata: Option<String>,
}

/// Ordered baggage entries. Inserting an existing key replaces its value.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Baggage {
    entries: Vec<(String, BaggageEntry)>,
}

impl Baggage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, e)| e.value.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert_with_metadata(key, value, None);
    }

    pub fn insert_with_metadata(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        metadata: Option<String>,
    ) {
        let key = key.into();
        let entry = BaggageEntry { value: value.into(), metadata };
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = entry,
            None => self.entries.push((key, entry)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BaggageEntry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    /// Parses a `baggage` header. Malformed members are skipped; an oversize
    /// header yields empty baggage.
    pub fn from_header(header: &str) -> Self {
        let mut baggage = Self::new();
        if header.len() > MAX_BYTES {
            return baggage;
        }
        for member in header.split(',').take(MAX_MEMBERS) {
            let (pair, metadata) = match member.split_once(';') {
                Some((pair, meta)) => (pair, Some(meta.trim().to_owned()).filter(|m| !m.is_empty())),
                None => (member, None),
            };
            let Some((key, value)) = pair.split_once('=') else { continue };
            let key = key.trim();
            if key.is_empty() || !key.bytes().all(is_token_byte) {
                continue;
            }
            let Some(value) = percent_decode(value.trim()) else { continue };
            baggage.insert_with_metadata(key, value, metadata);
        }
        baggage
    }

    /// Serializes to a `baggage` header value. Members that would push the
    /// header past the size limit are left out.
    pub fn to_header(&self) -> String {
        let mut out = String::new();
        for (key, entry) in &self.entries {
            let mut member = format!("{key}={}", percent_encode(&entry.value));
            if let Some(meta) = &entry.metadata {
                member.push(';');
                member.push_str(meta);
            }
            let sep = usize::from(!out.is_empty());
            if out.len() + sep + member.len() > MAX_BYTES {
                continue;
            }
            if sep == 1 {
                out.push(',');
            }
            out.push_str(&member);
        }
        out
    }
}

/// RFC 7230 `tchar`.
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// `baggage-octet` from the W3C grammar; everything else is escaped.
fn is_baggage_octet(b: u8) -> bool {
    matches!(b, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E) && b != b'%'
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        if is_baggage_octet(b) {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn percent_decode(value: &str) -> Option<String> {
    let raw = value.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            let hex = value.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_members_and_properties() {
        let b = Baggage::from_header("userId=alice, serverNode = DF%2028 ;p=1,isProduction=false");
        assert_eq!(b.len(), 3);
        assert_eq!(b.get("userId"), Some("alice"));
        assert_eq!(b.get("serverNode"), Some("DF 28"));
        let (_, entry) = b.iter().nth(1).unwrap();
        assert_eq!(entry.metadata.as_deref(), Some("p=1"));
    }

    #[test]
    fn skips_malformed_members() {
        let b = Baggage::from_header("novalue,=empty,good=1,bad key=2,broken=%zz");
        assert_eq!(b.len(), 1);
        assert_eq!(b.get("good"), Some("1"));
    }

    #[test]
    fn header_escapes_reserved_bytes() {
        let mut b = Baggage::new();
        b.insert("k", "a b,c;d%");
        assert_eq!(b.to_header(), "k=a%20b%2Cc%3Bd%25");
        assert_eq!(Baggage::from_header(&b.to_header()).get("k"), Some("a b,c;d%"));
    }

    #[test]
    fn oversize_header_is_ignored() {
        let huge = format!("k={}", "x".repeat(MAX_BYTES));
        assert!(Baggage::from_header(&huge).is_empty());
    }

    #[test]
    fn insert_replaces_existing_key() {
        let mut b = Baggage::new();
        b.insert("k", "1");
        b.insert("k", "2");
        assert_eq!(b.len(), 1);
        assert_eq!(b.get("k"), Some("2"));
    }
}
