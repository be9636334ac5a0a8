#![warn(missing_docs)]

//! gwire-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core items shared across all layers:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//!
//! Wire-format logic lives in `gwire-protocol`: the GGEP extension codec,
//! the HUGE composite extension parser, the message header, the per-type
//! payload codecs, and the dispatch factory.

/// Protocol constants shared across layers.
pub mod constants {
    /// The size of the fixed message header: 16-byte GUID, type byte,
    /// ttl byte, hops byte, and a 4-byte little-endian payload length.
    pub const HEADER_SIZE: usize = 23;
    /// The size of a message GUID.
    pub const GUID_SIZE: usize = 16;
    /// Fixed ceiling on ttl + hops. Anything above this is relay abuse.
    pub const HARD_MAX: u8 = 14;
    /// Default per-connection soft ceiling on ttl + hops.
    pub const DEFAULT_SOFT_MAX: u8 = 3;
    /// Default upper bound on a declared payload length.
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;
    /// The fixed size of a push request payload.
    pub const PUSH_PAYLOAD_SIZE: usize = 26;
    /// The size of a pong payload without its extension block.
    pub const PONG_STANDARD_PAYLOAD_SIZE: usize = 14;
    /// The size of the vendor message prefix: 4-byte vendor code,
    /// 2-byte selector, 2-byte version.
    pub const VENDOR_PREFIX_SIZE: usize = 8;
    /// Separator byte between extension tokens in a HUGE run.
    pub const EXTENSION_SEPARATOR: u8 = 0x1C;
    /// Every GGEP block starts with this magic byte.
    pub const GGEP_MAGIC: u8 = 0xC3;
    /// A GGEP key is 1 to 15 bytes; 4 header bits express its length.
    pub const GGEP_MAX_KEY_SIZE: usize = 15;
    /// A GGEP value is at most 262143 bytes; 18 bits in 3 length bytes.
    pub const GGEP_MAX_VALUE_SIZE: usize = 262_143;
    /// Maximum number of characters in query text.
    pub const MAX_QUERY_LENGTH: usize = 30;
    /// Maximum number of characters in the XML extension of a query.
    pub const MAX_XML_QUERY_LENGTH: usize = 500;
    /// Maximum size of the XML area of a query hit.
    pub const XML_MAX_SIZE: usize = 32 * 1024;
    /// Reserved push file index denoting a firewall-to-firewall
    /// transfer request rather than an ordinary download.
    pub const FW_TRANS_INDEX: u32 = 0xFFFF_FFFE;
}

/// Configuration options for the codec layer.
pub mod config;
/// Error types and results.
pub mod error;
