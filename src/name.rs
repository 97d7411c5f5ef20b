//! Minimal NDN name and component value types.
//!
//! The matcher consumes only a thin slice of NDN: a name is an ordered
//! sequence of typed byte strings, components compare by byte equality
//! including the type tag, and the type tag is inspectable. Full packet
//! encoding lives outside this crate.
//!
//! # Invariant
//! - `Component` equality covers both the type tag and the value bytes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::tlv;

/// Implicit SHA-256 digest component type.
pub const TYPE_IMPLICIT_SHA256: u32 = 0x01;
/// Parameters SHA-256 digest component type.
pub const TYPE_PARAMETERS_SHA256: u32 = 0x02;
/// Generic name component type.
pub const TYPE_GENERIC: u32 = 0x08;
/// Keyword name component type.
pub const TYPE_KEYWORD: u32 = 0x20;

/// Characters allowed verbatim in a component URI segment.
#[inline]
fn is_unreserved(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, b'-' | b'.' | b'_' | b'~')
}

/// Error raised while parsing a name or component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// A URI segment contains a character outside the component charset,
    /// a second `=`, or a malformed percent escape.
    IllegalUri(String),
    /// The type prefix before `=` is not a decimal number.
    BadTypeNumber(String),
    /// A component wire form ended prematurely or had trailing bytes.
    BadWire,
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameError::IllegalUri(seg) => write!(f, "{seg:?} is not a legal name component"),
            NameError::BadTypeNumber(seg) => write!(f, "{seg:?} has a bad component type number"),
            NameError::BadWire => write!(f, "malformed component wire form"),
        }
    }
}

impl std::error::Error for NameError {}

/// A typed byte string, the atomic unit of a name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Component {
    /// TLV type tag.
    pub typ: u32,
    /// Value bytes.
    pub value: Vec<u8>,
}

impl Component {
    /// Creates a component from a type tag and value bytes.
    #[inline]
    pub fn new(typ: u32, value: impl Into<Vec<u8>>) -> Self {
        Self { typ, value: value.into() }
    }

    /// Creates a generic (type 8) component.
    #[inline]
    pub fn generic(value: impl Into<Vec<u8>>) -> Self {
        Self::new(TYPE_GENERIC, value)
    }

    /// Parses one URI segment.
    ///
    /// Accepts an optional `<number>=` type prefix, the special prefixes
    /// `sha256digest=` and `params-sha256=` followed by hex, and percent
    /// escapes in the value part. An empty segment is an empty generic
    /// component.
    pub fn from_uri(seg: &str) -> Result<Self, NameError> {
        if seg.is_empty() {
            return Ok(Self::generic(Vec::new()));
        }
        let bad = || NameError::IllegalUri(seg.to_owned());
        let (typ, rest) = match seg.find('=') {
            None => (TYPE_GENERIC, seg),
            Some(at) => {
                let (prefix, rest) = (&seg[..at], &seg[at + 1..]);
                if rest.contains('=') {
                    return Err(bad());
                }
                match prefix {
                    "sha256digest" => {
                        return Ok(Self::new(TYPE_IMPLICIT_SHA256, decode_hex(rest).ok_or_else(bad)?))
                    }
                    "params-sha256" => {
                        return Ok(Self::new(TYPE_PARAMETERS_SHA256, decode_hex(rest).ok_or_else(bad)?))
                    }
                    _ => {
                        let typ = prefix
                            .parse::<u32>()
                            .map_err(|_| NameError::BadTypeNumber(seg.to_owned()))?;
                        (typ, rest)
                    }
                }
            }
        };
        let bytes = rest.as_bytes();
        let mut value = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'%' => {
                    let hi = (bytes.get(i + 1).copied().and_then(hex_val)).ok_or_else(bad)?;
                    let lo = (bytes.get(i + 2).copied().and_then(hex_val)).ok_or_else(bad)?;
                    value.push(hi << 4 | lo);
                    i += 3;
                }
                ch if is_unreserved(ch) => {
                    value.push(ch);
                    i += 1;
                }
                _ => return Err(bad()),
            }
        }
        Ok(Self::new(typ, value))
    }

    /// Appends the component's wire form (`type length value`) to `buf`.
    pub fn write_wire(&self, buf: &mut Vec<u8>) {
        tlv::write_tlv(buf, self.typ as u64, &self.value);
    }

    /// Returns the component's wire form.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(tlv::tl_num_size(self.typ as u64) + tlv::tl_num_size(self.value.len() as u64) + self.value.len());
        self.write_wire(&mut buf);
        buf
    }

    /// Parses a component from its exact wire form. Trailing bytes are an
    /// error.
    pub fn from_wire(wire: &[u8]) -> Result<Self, NameError> {
        let mut rd = tlv::Reader::new(wire);
        let (typ, payload) = rd.read_tlv().map_err(|_| NameError::BadWire)?;
        if !rd.is_empty() {
            return Err(NameError::BadWire);
        }
        let typ = u32::try_from(typ).map_err(|_| NameError::BadWire)?;
        Ok(Self::new(typ, payload.to_vec()))
    }
}

impl FromStr for Component {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_uri(s)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.typ {
            TYPE_IMPLICIT_SHA256 => {
                write!(f, "sha256digest=")?;
                return write_hex(f, &self.value);
            }
            TYPE_PARAMETERS_SHA256 => {
                write!(f, "params-sha256=")?;
                return write_hex(f, &self.value);
            }
            TYPE_GENERIC => {}
            typ => write!(f, "{typ}=")?,
        }
        for &b in &self.value {
            if is_unreserved(b) {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "%{b:02X}")?;
            }
        }
        Ok(())
    }
}

fn hex_val(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    let bytes = s.as_bytes();
    if bytes.len() % 2 != 0 {
        return None;
    }
    bytes
        .chunks(2)
        .map(|pair| Some(hex_val(pair[0])? << 4 | hex_val(pair[1])?))
        .collect()
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

/// An ordered sequence of components.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Name(Vec<Component>);

impl Name {
    /// Creates a name from components.
    #[inline]
    pub fn new(comps: Vec<Component>) -> Self {
        Self(comps)
    }

    /// Number of components.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty name `/`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The component sequence.
    #[inline]
    pub fn components(&self) -> &[Component] {
        &self.0
    }

    /// Parses a URI such as `/ndn/blog/KEY/1`. Empty segments are
    /// skipped, so a leading or doubled slash is harmless.
    pub fn from_uri(uri: &str) -> Result<Self, NameError> {
        let comps = uri
            .split('/')
            .filter(|seg| !seg.is_empty())
            .map(Component::from_uri)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(comps))
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_uri(s)
    }
}

impl From<Vec<Component>> for Name {
    fn from(comps: Vec<Component>) -> Self {
        Self(comps)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for comp in &self.0 {
            write!(f, "/{comp}")?;
        }
        Ok(())
    }
}
