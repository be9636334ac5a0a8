//! Typed content identifiers.
//!
//! Queries and query hits name files by URN rather than by filename. Two
//! namespaces are in circulation: `urn:sha1:` with a 32-character Base32
//! SHA-1 digest, and `urn:bitprint:` with that digest, a dot, and a
//! 39-character Base32 tree hash. A query may also carry a bare tag with
//! no value, asking responders to include URNs in their hits: a namespace
//! tag such as `urn:sha1:` requests that kind, and `urn:` alone requests
//! URNs of every kind.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const SHA1_CHARS: usize = 32;
const BITPRINT_CHARS: usize = 72;

/// A string did not parse as a URN of a supported namespace.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("not a recognized urn: {0:?}")]
pub struct BadUrnError(pub String);

/// The namespace of a [`Urn`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UrnKind {
    /// A SHA-1 digest of the file content.
    Sha1,
    /// A SHA-1 digest plus a TigerTree root, dot-separated.
    Bitprint,
}

impl UrnKind {
    /// The namespace prefix including the trailing colon.
    pub fn prefix(self) -> &'static str {
        match self {
            UrnKind::Sha1 => "urn:sha1:",
            UrnKind::Bitprint => "urn:bitprint:",
        }
    }
}

/// A bare URN request tag carried in a query's extension run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UrnType {
    /// `urn:` alone, requesting URNs of every kind.
    Any,
    /// A namespace tag such as `urn:sha1:`, requesting that kind.
    Kind(UrnKind),
}

impl UrnType {
    /// Recognizes a bare tag such as `urn:` or `urn:sha1:`, with or
    /// without the trailing colon, ignoring case.
    pub fn from_prefix(tag: &str) -> Option<UrnType> {
        let lower = tag.to_ascii_lowercase();
        match lower.trim_end_matches(':') {
            "urn" => Some(UrnType::Any),
            "urn:sha1" => Some(UrnType::Kind(UrnKind::Sha1)),
            "urn:bitprint" => Some(UrnType::Kind(UrnKind::Bitprint)),
            _ => None,
        }
    }

    /// The tag including the trailing colon.
    pub fn prefix(self) -> &'static str {
        match self {
            UrnType::Any => "urn:",
            UrnType::Kind(kind) => kind.prefix(),
        }
    }
}

/// A validated content identifier, stored in canonical upper-case form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Urn {
    kind: UrnKind,
    value: String,
}

impl Urn {
    /// The namespace this URN belongs to.
    pub fn kind(&self) -> UrnKind {
        self.kind
    }

    /// The Base32 value without the namespace prefix.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// For a bitprint, the SHA-1 half; for a plain SHA-1 URN, the whole
    /// value. Lets a bitprint match a sha1 query for the same file.
    pub fn sha1(&self) -> &str {
        &self.value[..SHA1_CHARS]
    }
}

impl FromStr for Urn {
    type Err = BadUrnError;

    /// Parses strictly: known namespace, exact value length, Base32
    /// alphabet only. The prefix is case-insensitive and the value is
    /// canonicalized to upper case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let (kind, value) = if let Some(rest) = lower.strip_prefix("urn:sha1:") {
            (UrnKind::Sha1, rest)
        } else if let Some(rest) = lower.strip_prefix("urn:bitprint:") {
            (UrnKind::Bitprint, rest)
        } else {
            return Err(BadUrnError(s.to_owned()));
        };

        let value = value.to_ascii_uppercase();
        let valid = match kind {
            UrnKind::Sha1 => value.len() == SHA1_CHARS && value.bytes().all(is_base32),
            UrnKind::Bitprint => {
                value.len() == BITPRINT_CHARS
                    && value.as_bytes()[SHA1_CHARS] == b'.'
                    && value
                        .bytes()
                        .enumerate()
                        .all(|(i, b)| i == SHA1_CHARS || is_base32(b))
            }
        };
        if !valid {
            return Err(BadUrnError(s.to_owned()));
        }
        Ok(Urn { kind, value })
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.value)
    }
}

fn is_base32(b: u8) -> bool {
    b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b)
}
