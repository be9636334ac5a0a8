//! Error taxonomy for the wire codec.
//!
//! Four severities, from widest to narrowest blast radius:
//!
//! - [`FrameError`] is fatal to the connection: the stream can no longer be
//!   resynchronized (header truncated mid-read, absurd length, closed socket).
//! - [`BadPacketError`] is scoped to one message: the caller drops it and
//!   keeps reading the stream.
//! - [`BadGgepBlockError`] is scoped to one extension block: callers treat
//!   the block as absent, unless the enclosing message cannot locate its own
//!   trailing bytes without it, in which case it escalates to a packet error.
//! - [`BadGgepPropertyError`] is scoped to one key lookup: the property is
//!   treated as unset. Absence and corruption are distinct variants so
//!   expected absence never rides on error control flow.

use std::io;
use thiserror::Error;

/// Stream-fatal framing failures. The connection should be closed.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended or timed out after part of a header had been read.
    #[error("message header truncated after {0} bytes")]
    HeaderTruncated(usize),
    /// The stream ended before the announced payload was complete.
    #[error("payload truncated: expected {expected} bytes, got {got}")]
    PayloadTruncated {
        /// Payload length the header announced.
        expected: usize,
        /// Bytes actually available.
        got: usize,
    },
    /// The header declared a payload length beyond the configured bound.
    #[error("unreasonable payload length: {0}")]
    LengthOutOfRange(usize),
    /// The underlying stream failed.
    #[error("stream error: {0}")]
    Io(#[from] io::Error),
}

/// Message-scoped failures. The caller drops this one message and continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BadPacketError {
    /// Hop count exceeds the soft ceiling for a relayed request type.
    #[error("hops {hops} exceed soft max {soft_max}")]
    HopsExceedSoftMax {
        /// Hops the message arrived with.
        hops: u8,
        /// Soft ceiling configured for this connection.
        soft_max: u8,
    },
    /// ttl + hops exceeds the hard ceiling; probably spam.
    #[error("ttl {ttl} + hops {hops} exceeds hard max")]
    OverHardMax {
        /// Time-to-live the message arrived with.
        ttl: u8,
        /// Hops the message arrived with.
        hops: u8,
    },
    /// The type code is not one this factory knows.
    #[error("unrecognized message type code: {0:#04x}")]
    UnknownType(u8),
    /// The payload is shorter than the fixed part of this message kind.
    #[error("payload too small: {0} bytes")]
    PayloadTooSmall(usize),
    /// A port field was zero or otherwise unusable.
    #[error("invalid port: {0}")]
    InvalidPort(u16),
    /// An address field was unusable (e.g. 0.0.0.0 or a documentation net).
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// A query arrived with no query text, no XML, and no URNs.
    #[error("empty query")]
    EmptyQuery,
    /// Query text longer than the allowed maximum.
    #[error("query too large: {0} chars")]
    QueryTooLarge(usize),
    /// XML extension longer than the allowed maximum.
    #[error("xml too large: {0} chars")]
    XmlTooLarge(usize),
    /// Query text contains a character the configuration forbids.
    #[error("illegal character in query: {0:?}")]
    IllegalChars(char),
    /// Text that had to be UTF-8 was not.
    #[error("malformed text field")]
    MalformedText,
    /// The vendor message envelope or a known sub-format body was
    /// truncated or malformed.
    #[error("invalid vendor envelope: {0}")]
    InvalidVendorEnvelope(&'static str),
    /// A structurally required extension block failed to parse and the
    /// bytes after it could not be located.
    #[error("extension block error: {0}")]
    ExtensionBlock(#[from] BadGgepBlockError),
}

/// Block-scoped GGEP failures. Trailing entries cannot be located once one
/// entry is malformed, so the whole block is abandoned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BadGgepBlockError {
    /// First byte was not the 0xC3 magic.
    #[error("missing GGEP magic byte")]
    MissingMagic,
    /// The block ended before the current entry was complete.
    #[error("truncated GGEP entry")]
    Truncated,
    /// Entry flags declared a zero-length key.
    #[error("zero-length GGEP key")]
    ZeroKeyLength,
    /// The reserved flag bit (0x10) was set.
    #[error("reserved GGEP flag bit set")]
    ReservedBitSet,
    /// More than three length bytes before the terminator bit.
    #[error("unterminated GGEP length field")]
    UnterminatedLength,
    /// Declared value length runs past the end of the buffer.
    #[error("GGEP value overruns buffer")]
    ValueOverrun,
    /// A COBS-flagged value failed to decode.
    #[error("bad COBS encoding")]
    BadCobs,
    /// A deflate-flagged value failed to inflate.
    #[error("bad compressed data")]
    BadDeflate,
}

/// Key-scoped GGEP failures, returned by typed property getters.
/// Always recoverable: the caller treats the property as unset.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BadGgepPropertyError {
    /// The key is not present in the block.
    #[error("extension not present")]
    Missing,
    /// The key is present but carries no value.
    #[error("extension has no value")]
    NoValue,
    /// The value has more bytes than the requested integer width.
    #[error("extension value too large for requested type")]
    ValueTooLarge,
    /// The value bytes do not decode as the requested type.
    #[error("malformed extension value")]
    Malformed,
}

/// Either failure mode of a factory read: a stream-fatal framing error or a
/// recoverable per-message rejection. Callers match to decide whether to
/// drop one message or the whole connection.
#[derive(Debug, Error)]
pub enum ReadError {
    /// Fatal: close the connection.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Recoverable: drop this message, keep reading.
    #[error(transparent)]
    Packet(#[from] BadPacketError),
}

impl ReadError {
    /// True when the stream cannot be resynchronized and must be closed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReadError::Frame(_))
    }
}
