//! The GGEP extension block codec.
//!
//! A GGEP block is a compact, self-delimiting run of key/value extensions
//! that rides inside ping, pong, query, and query-hit payloads. The block
//! starts with the magic byte 0xC3 and holds one entry per extension:
//!
//! - one flags byte: bit7 marks the last entry, bit6 a COBS-stuffed value,
//!   bit5 a deflate-compressed value, bits 3-0 the key length (1-15);
//! - the raw key bytes;
//! - 1 to 3 length bytes carrying 6 bits each, `10xxxxxx` for continuation
//!   and `01xxxxxx` on the final byte, so no length byte can be zero;
//! - the value bytes, compressed first and then COBS-stuffed as flagged.
//!
//! Blocks are built incrementally with the `put_*` methods and serialized
//! once, or parsed once from a buffer and then read. A structural parse
//! failure abandons the whole block (trailing entries cannot be located),
//! while a typed getter failure is scoped to that one key.

/// Consistent Overhead Byte Stuffing for values that may not carry zeros.
pub mod cobs;

use std::collections::BTreeMap;
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use gwire_core::constants::{GGEP_MAGIC, GGEP_MAX_KEY_SIZE, GGEP_MAX_VALUE_SIZE};
use gwire_core::error::{BadGgepBlockError, BadGgepPropertyError};

/// Well-known GGEP extension keys.
pub mod keys {
    /// Browse Host: the responder lets you list everything it shares.
    pub const BROWSE_HOST: &str = "BH";
    /// Average daily uptime in seconds.
    pub const DAILY_UPTIME: &str = "DU";
    /// Legacy GUESS support marker.
    pub const UNICAST_SUPPORT: &str = "GUE";
    /// Vendor code plus packed version byte, e.g. `LIME#`.
    pub const VENDOR_INFO: &str = "VC";
    /// Ultrapeer marker: version byte, free leaf slots, free ultrapeer slots.
    pub const ULTRAPEER: &str = "UP";
    /// Marks a query hit answering a multicast query.
    pub const MULTICAST_RESPONSE: &str = "MCAST";
    /// Push proxy addresses, packed 6-byte ip:port chunks.
    pub const PUSH_PROXIES: &str = "PUSH";
    /// Alternate locations, packed 6-byte ip:port chunks.
    pub const ALTS: &str = "ALT";
    /// External address echo: 4-byte ip plus 2-byte port.
    pub const IPPORT: &str = "IP";
    /// UDP host cache DNS name or address.
    pub const UDP_HOST_CACHE: &str = "UDPHC";
    /// Requests packed host addresses in the answering pong.
    pub const SUPPORTS_CACHED_PONGS: &str = "SCP";
    /// Packed ip:port list carried in a pong.
    pub const PACKED_IPPORTS: &str = "IPP";
    /// Packed UDP host cache list.
    pub const PACKED_HOST_CACHES: &str = "PHC";
    /// Feature query selector (1 = What's New).
    pub const FEATURE_QUERY: &str = "WH";
    /// Marks a query that must not be proxied.
    pub const NO_PROXY: &str = "NP";
    /// Media-type filter mask for a query.
    pub const META: &str = "M";
    /// Locale preference plus wanted-peer count.
    pub const CLIENT_LOCALE: &str = "LOC";
    /// File creation time in seconds since the epoch.
    pub const CREATE_TIME: &str = "CT";
    /// Firewall-to-firewall transfer support version.
    pub const FW_TRANS: &str = "FW";
}

#[derive(Clone, Debug)]
struct Entry {
    value: Option<Vec<u8>>,
    compress: bool,
}

/// An ordered mapping of short string keys to optional byte values.
///
/// Keys are unique within a block. An empty block serializes to nothing at
/// all, not even the magic byte.
#[derive(Clone, Debug, Default)]
pub struct GgepBlock {
    entries: BTreeMap<String, Entry>,
    escape_nulls: bool,
}

impl GgepBlock {
    /// Makes an empty block whose values will be COBS-stuffed on write
    /// whenever they contain a zero byte.
    pub fn new() -> Self {
        GgepBlock { entries: BTreeMap::new(), escape_nulls: true }
    }

    /// Makes an empty block whose destination tolerates zero bytes, so
    /// values are never COBS-stuffed.
    pub fn allowing_nulls() -> Self {
        GgepBlock { entries: BTreeMap::new(), escape_nulls: false }
    }

    /// Inserts or overwrites an entry with a byte value.
    ///
    /// Panics if the key is empty, longer than 15 bytes, or contains a zero
    /// byte, or if the value cannot fit the 262143-byte wire ceiling once
    /// stuffing overhead is accounted for; those are producer bugs, not
    /// network input.
    pub fn put(&mut self, key: &str, value: &[u8]) {
        validate_key(key);
        self.validate_value(value);
        self.entries
            .insert(key.to_owned(), Entry { value: Some(value.to_vec()), compress: false });
    }

    /// Inserts an entry whose value will be deflate-compressed on write,
    /// unless compression fails to make it smaller.
    pub fn put_compressed(&mut self, key: &str, value: &[u8]) {
        validate_key(key);
        self.validate_value(value);
        self.entries
            .insert(key.to_owned(), Entry { value: Some(value.to_vec()), compress: true });
    }

    /// Inserts an entry with a UTF-8 string value.
    pub fn put_str(&mut self, key: &str, value: &str) {
        self.put(key, value.as_bytes());
    }

    /// Inserts an entry with no value at all; the key's presence is the
    /// whole signal.
    pub fn put_flag(&mut self, key: &str) {
        validate_key(key);
        self.entries.insert(key.to_owned(), Entry { value: None, compress: false });
    }

    /// Inserts a number encoded little-endian in the fewest bytes that hold
    /// it (at least one).
    pub fn put_u32(&mut self, key: &str, value: u32) {
        self.put(key, &min_le_bytes(u64::from(value)));
    }

    /// Inserts a number encoded little-endian in the fewest bytes that hold
    /// it (at least one).
    pub fn put_u64(&mut self, key: &str, value: u64) {
        self.put(key, &min_le_bytes(value));
    }

    /// True when the block carries the key, with or without a value.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// The raw value bytes for a key, or `None` when the key is absent or
    /// valueless. Expected absence never needs an error path.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).and_then(|e| e.value.as_deref())
    }

    /// The value bytes for a key that is required to carry data.
    pub fn bytes(&self, key: &str) -> Result<&[u8], BadGgepPropertyError> {
        let entry = self.entries.get(key).ok_or(BadGgepPropertyError::Missing)?;
        entry.value.as_deref().ok_or(BadGgepPropertyError::NoValue)
    }

    /// The value for a key decoded as UTF-8 text.
    pub fn string(&self, key: &str) -> Result<&str, BadGgepPropertyError> {
        std::str::from_utf8(self.bytes(key)?).map_err(|_| BadGgepPropertyError::Malformed)
    }

    /// The value for a key decoded as a little-endian integer of at most
    /// four bytes.
    pub fn u32_value(&self, key: &str) -> Result<u32, BadGgepPropertyError> {
        let bytes = self.bytes(key)?;
        if bytes.is_empty() {
            return Err(BadGgepPropertyError::NoValue);
        }
        if bytes.len() > 4 {
            return Err(BadGgepPropertyError::ValueTooLarge);
        }
        let mut buf = [0u8; 4];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(u32::from_le_bytes(buf))
    }

    /// The value for a key decoded as a little-endian integer of at most
    /// eight bytes.
    pub fn u64_value(&self, key: &str) -> Result<u64, BadGgepPropertyError> {
        let bytes = self.bytes(key)?;
        if bytes.is_empty() {
            return Err(BadGgepPropertyError::NoValue);
        }
        if bytes.len() > 8 {
            return Err(BadGgepPropertyError::ValueTooLarge);
        }
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Iterates the keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the block has no entries and would serialize to nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies every entry of `other` into this block, overwriting on key
    /// collision. HUGE runs can carry several blocks that act as one.
    pub fn merge(&mut self, other: GgepBlock) {
        self.entries.extend(other.entries);
    }

    /// Producer-side ceiling check. A value headed for a stuffed block must
    /// leave room for the COBS overhead, one byte per 254-byte run.
    fn validate_value(&self, value: &[u8]) {
        let wire_max = if self.escape_nulls && value.contains(&0) {
            value.len() + value.len() / 254 + 1
        } else {
            value.len()
        };
        assert!(wire_max <= GGEP_MAX_VALUE_SIZE, "GGEP value too large");
    }

    /// COBS-stuffs `wire` when this block escapes zeros and the bytes call
    /// for it. Returns the bytes and whether stuffing was applied.
    fn stuffed(&self, wire: Vec<u8>) -> (Vec<u8>, bool) {
        if self.escape_nulls && wire.contains(&0) {
            (cobs::encode(&wire), true)
        } else {
            (wire, false)
        }
    }

    /// Serializes the block onto `out`. An empty block writes nothing.
    pub fn write(&self, out: &mut Vec<u8>) {
        if self.entries.is_empty() {
            return;
        }
        out.push(GGEP_MAGIC);

        let last = self.entries.len() - 1;
        for (i, (key, entry)) in self.entries.iter().enumerate() {
            let raw = entry.value.as_deref().unwrap_or_default();
            let (mut wire, mut encoded) = self.stuffed(raw.to_vec());
            let mut compressed = false;
            if entry.compress && !raw.is_empty() {
                // Deflate only pays for itself when its result, stuffed
                // like everything else, still beats the plain form; the
                // winner therefore never outgrows a value `put` accepted.
                let (deflated, deflated_encoded) = self.stuffed(deflate(raw));
                if deflated.len() < wire.len() {
                    wire = deflated;
                    encoded = deflated_encoded;
                    compressed = true;
                }
            }

            let mut flags = key.len() as u8;
            if i == last {
                flags |= 0x80;
            }
            if encoded {
                flags |= 0x40;
            }
            if compressed {
                flags |= 0x20;
            }
            out.push(flags);
            out.extend_from_slice(key.as_bytes());
            write_length(out, wire.len());
            out.extend_from_slice(&wire);
        }
    }

    /// Serializes the block into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }

    /// Parses one block out of `buf` starting at `offset`, which must point
    /// at the magic byte. Returns the block and the offset just past its
    /// last value.
    ///
    /// Any structural defect abandons the whole block: once an entry is
    /// malformed, the ones after it cannot be located.
    pub fn parse(buf: &[u8], offset: usize) -> Result<(GgepBlock, usize), BadGgepBlockError> {
        if offset >= buf.len() || buf[offset] != GGEP_MAGIC {
            return Err(BadGgepBlockError::MissingMagic);
        }

        let mut block = GgepBlock::new();
        let mut pos = offset + 1;
        loop {
            let flags = *buf.get(pos).ok_or(BadGgepBlockError::Truncated)?;
            if flags & 0x10 != 0 {
                return Err(BadGgepBlockError::ReservedBitSet);
            }
            let is_last = flags & 0x80 != 0;
            let encoded = flags & 0x40 != 0;
            let compressed = flags & 0x20 != 0;
            let key_len = (flags & 0x0F) as usize;
            if key_len == 0 {
                return Err(BadGgepBlockError::ZeroKeyLength);
            }
            pos += 1;

            let key_bytes = buf.get(pos..pos + key_len).ok_or(BadGgepBlockError::Truncated)?;
            let key = std::str::from_utf8(key_bytes)
                .map_err(|_| BadGgepBlockError::Truncated)?
                .to_owned();
            pos += key_len;

            let (data_len, used) = read_length(&buf[pos..])?;
            pos += used;

            let mut value = if data_len > 0 {
                buf.get(pos..pos + data_len)
                    .ok_or(BadGgepBlockError::ValueOverrun)?
                    .to_vec()
            } else {
                Vec::new()
            };
            pos += data_len;

            if encoded {
                value = cobs::decode(&value)?;
            }
            if compressed {
                value = inflate(&value)?;
            }

            let entry_value = if data_len > 0 { Some(value) } else { None };
            block
                .entries
                .insert(key, Entry { value: entry_value, compress: compressed });

            if is_last {
                break;
            }
        }

        Ok((block, pos))
    }
}

/// Blocks are equal when they hold the same key set with byte-identical
/// values; entry order and compression markers do not matter.
impl PartialEq for GgepBlock {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(key, entry)| {
                other
                    .entries
                    .get(key)
                    .map_or(false, |o| o.value == entry.value)
            })
    }
}

impl Eq for GgepBlock {}

fn validate_key(key: &str) {
    assert!(!key.is_empty(), "GGEP key must not be empty");
    assert!(key.len() <= GGEP_MAX_KEY_SIZE, "GGEP key too long: {key:?}");
    assert!(!key.bytes().any(|b| b == 0), "GGEP key must not contain NUL");
}

/// Little-endian bytes with trailing zeros dropped, at least one byte.
fn min_le_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_le_bytes();
    let used = (8 - value.leading_zeros() as usize / 8).max(1);
    bytes[..used].to_vec()
}

/// Writes a value length as 1-3 bytes of 6 bits each, `10xxxxxx` on
/// continuation bytes and `01xxxxxx` on the final byte.
fn write_length(out: &mut Vec<u8>, len: usize) {
    debug_assert!(len <= GGEP_MAX_VALUE_SIZE);
    let high = (len >> 12) & 0x3F;
    let mid = (len >> 6) & 0x3F;
    if high != 0 {
        out.push(0x80 | high as u8);
    }
    // The middle byte is position, not value: it must appear whenever a
    // byte above it did, even if its own six bits are all zero.
    if high != 0 || mid != 0 {
        out.push(0x80 | mid as u8);
    }
    out.push(0x40 | (len & 0x3F) as u8);
}

/// Reads a 1-3 byte length field; returns the length and bytes consumed.
fn read_length(buf: &[u8]) -> Result<(usize, usize), BadGgepBlockError> {
    let mut length = 0usize;
    for (i, &b) in buf.iter().enumerate() {
        if i == 3 {
            return Err(BadGgepBlockError::UnterminatedLength);
        }
        length = (length << 6) | (b & 0x3F) as usize;
        if b & 0x40 != 0 {
            return Ok((length, i + 1));
        }
    }
    Err(BadGgepBlockError::Truncated)
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing to a Vec cannot fail.
    encoder.write_all(data).expect("in-memory deflate");
    encoder.finish().expect("in-memory deflate")
}

/// Inflates with an output cap so a hostile block cannot balloon memory.
fn inflate(data: &[u8]) -> Result<Vec<u8>, BadGgepBlockError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match decoder.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                out.extend_from_slice(&chunk[..n]);
                if out.len() > GGEP_MAX_VALUE_SIZE {
                    return Err(BadGgepBlockError::BadDeflate);
                }
            }
            Err(_) => return Err(BadGgepBlockError::BadDeflate),
        }
    }
    Ok(out)
}
