//! Vendor-specific messages.
//!
//! The payload starts with an 8-byte envelope: a 4-byte vendor code, a
//! 16-bit selector, and a 16-bit version, all little-endian. The
//! (vendor, selector) pair names the sub-format of the remaining bytes.
//! Two sub-formats are built in; every other pair round-trips opaquely so
//! unknown capabilities pass through relays unharmed.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};

use gwire_core::config::Config;
use gwire_core::constants::VENDOR_PREFIX_SIZE;
use gwire_core::error::BadPacketError;

use crate::guid::Guid;
use crate::header::{MessageHeader, MessageType};
use crate::messages::{Message, MessageCodec};

/// Vendor code for messages-supported announcements.
pub const VENDOR_LIME: [u8; 4] = *b"LIME";
/// Vendor code for hops-flow throttling.
pub const VENDOR_BEAR: [u8; 4] = *b"BEAR";

/// Selector of the messages-supported announcement.
pub const SELECTOR_MESSAGES_SUPPORTED: u16 = 0;
/// Selector of the hops-flow throttle.
pub const SELECTOR_HOPS_FLOW: u16 = 4;

/// One capability advertised in a messages-supported announcement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VendorCapability {
    /// Vendor code of the capability.
    pub vendor: [u8; 4],
    /// Selector within that vendor's space.
    pub selector: u16,
    /// Highest supported version.
    pub version: u16,
}

/// The decoded body of a vendor message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VendorPayload {
    /// The sender's list of supported vendor messages.
    MessagesSupported(Vec<VendorCapability>),
    /// Upper bound on the hops of queries the sender wants relayed to it.
    HopsFlow {
        /// Queries with more hops than this should not be sent.
        max_ttl: u8,
    },
    /// An unrecognized (vendor, selector) pair, carried verbatim.
    Opaque(Vec<u8>),
}

/// A vendor-specific message.
#[derive(Clone, Debug)]
pub struct VendorMessage {
    header: MessageHeader,
    vendor: [u8; 4],
    selector: u16,
    version: u16,
    payload: VendorPayload,
}

impl VendorMessage {
    /// A messages-supported announcement. Vendor messages are point to
    /// point, so ttl is 1.
    pub fn messages_supported(capabilities: Vec<VendorCapability>) -> Self {
        VendorMessage {
            header: MessageHeader::new(Guid::new(), MessageType::Vendor, 1),
            vendor: VENDOR_LIME,
            selector: SELECTOR_MESSAGES_SUPPORTED,
            version: 1,
            payload: VendorPayload::MessagesSupported(capabilities),
        }
    }

    /// A hops-flow throttle: ask the receiver not to relay queries with
    /// more than `max_ttl` hops to us.
    pub fn hops_flow(max_ttl: u8) -> Self {
        VendorMessage {
            header: MessageHeader::new(Guid::new(), MessageType::Vendor, 1),
            vendor: VENDOR_BEAR,
            selector: SELECTOR_HOPS_FLOW,
            version: 1,
            payload: VendorPayload::HopsFlow { max_ttl },
        }
    }

    /// An arbitrary vendor message with opaque bytes.
    pub fn opaque(vendor: [u8; 4], selector: u16, version: u16, bytes: Vec<u8>) -> Self {
        VendorMessage {
            header: MessageHeader::new(Guid::new(), MessageType::Vendor, 1),
            vendor,
            selector,
            version,
            payload: VendorPayload::Opaque(bytes),
        }
    }

    /// The shared header.
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Mutable access to the shared header, e.g. to install a hopped copy.
    pub fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    /// The 4-byte vendor code.
    pub fn vendor(&self) -> [u8; 4] {
        self.vendor
    }

    /// The selector within the vendor's space.
    pub fn selector(&self) -> u16 {
        self.selector
    }

    /// The format version.
    pub fn version(&self) -> u16 {
        self.version
    }

    /// The decoded body.
    pub fn payload(&self) -> &VendorPayload {
        &self.payload
    }

    /// Appends the envelope and body bytes.
    pub fn write_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.vendor);
        out.extend_from_slice(&self.selector.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        match &self.payload {
            VendorPayload::MessagesSupported(caps) => {
                out.extend_from_slice(&(caps.len() as u16).to_le_bytes());
                for cap in caps {
                    out.extend_from_slice(&cap.vendor);
                    out.extend_from_slice(&cap.selector.to_le_bytes());
                    out.extend_from_slice(&cap.version.to_le_bytes());
                }
            }
            VendorPayload::HopsFlow { max_ttl } => out.push(*max_ttl),
            VendorPayload::Opaque(bytes) => out.extend_from_slice(bytes),
        }
    }
}

type SubDecoder = fn(&[u8]) -> Result<VendorPayload, BadPacketError>;

/// Maps (vendor, selector) pairs to body decoders. Built once at startup;
/// pairs without an entry decode to [`VendorPayload::Opaque`].
pub struct VendorCodecTable {
    decoders: HashMap<([u8; 4], u16), SubDecoder>,
}

impl Default for VendorCodecTable {
    fn default() -> Self {
        let mut table = VendorCodecTable { decoders: HashMap::new() };
        table.register(VENDOR_LIME, SELECTOR_MESSAGES_SUPPORTED, decode_messages_supported);
        table.register(VENDOR_BEAR, SELECTOR_HOPS_FLOW, decode_hops_flow);
        table
    }
}

impl VendorCodecTable {
    /// Adds or replaces the decoder for a (vendor, selector) pair.
    pub fn register(&mut self, vendor: [u8; 4], selector: u16, decoder: SubDecoder) {
        self.decoders.insert((vendor, selector), decoder);
    }

    fn decode_body(
        &self,
        vendor: [u8; 4],
        selector: u16,
        body: &[u8],
    ) -> Result<VendorPayload, BadPacketError> {
        match self.decoders.get(&(vendor, selector)) {
            Some(decoder) => decoder(body),
            None => Ok(VendorPayload::Opaque(body.to_vec())),
        }
    }
}

fn decode_messages_supported(body: &[u8]) -> Result<VendorPayload, BadPacketError> {
    if body.len() < 2 {
        return Err(BadPacketError::InvalidVendorEnvelope(
            "messages-supported body too short",
        ));
    }
    let count = LittleEndian::read_u16(&body[0..2]) as usize;
    let entries = &body[2..];
    if entries.len() < count * 8 {
        return Err(BadPacketError::InvalidVendorEnvelope(
            "truncated capability list",
        ));
    }
    let capabilities = entries
        .chunks_exact(8)
        .take(count)
        .map(|c| VendorCapability {
            vendor: [c[0], c[1], c[2], c[3]],
            selector: LittleEndian::read_u16(&c[4..6]),
            version: LittleEndian::read_u16(&c[6..8]),
        })
        .collect();
    Ok(VendorPayload::MessagesSupported(capabilities))
}

fn decode_hops_flow(body: &[u8]) -> Result<VendorPayload, BadPacketError> {
    match body.first() {
        Some(&max_ttl) => Ok(VendorPayload::HopsFlow { max_ttl }),
        None => Err(BadPacketError::InvalidVendorEnvelope("empty hops-flow body")),
    }
}

/// Decodes vendor message payloads via a sub-codec table.
pub struct VendorCodec {
    table: VendorCodecTable,
}

impl VendorCodec {
    /// A codec with the built-in sub-formats registered.
    pub fn new() -> Self {
        VendorCodec { table: VendorCodecTable::default() }
    }

    /// A codec with a caller-assembled table.
    pub fn with_table(table: VendorCodecTable) -> Self {
        VendorCodec { table }
    }
}

impl Default for VendorCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCodec for VendorCodec {
    fn decode(
        &self,
        header: MessageHeader,
        payload: &[u8],
        _config: &Config,
    ) -> Result<Message, BadPacketError> {
        if payload.len() < VENDOR_PREFIX_SIZE {
            return Err(BadPacketError::InvalidVendorEnvelope("prefix too short"));
        }
        let vendor = [payload[0], payload[1], payload[2], payload[3]];
        let selector = LittleEndian::read_u16(&payload[4..6]);
        let version = LittleEndian::read_u16(&payload[6..8]);
        let body = self
            .table
            .decode_body(vendor, selector, &payload[VENDOR_PREFIX_SIZE..])?;

        Ok(Message::Vendor(VendorMessage {
            header,
            vendor,
            selector,
            version,
            payload: body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(payload: &[u8]) -> Result<Message, BadPacketError> {
        let header = MessageHeader::new(Guid::new(), MessageType::Vendor, 1);
        VendorCodec::new().decode(header, payload, &Config::default())
    }

    #[test]
    fn roundtrip_messages_supported() {
        let caps = vec![
            VendorCapability { vendor: VENDOR_BEAR, selector: 4, version: 1 },
            VendorCapability { vendor: VENDOR_LIME, selector: 21, version: 2 },
        ];
        let msg = VendorMessage::messages_supported(caps.clone());
        let mut payload = Vec::new();
        msg.write_payload(&mut payload);

        let Message::Vendor(parsed) = decode(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(parsed.vendor(), VENDOR_LIME);
        assert_eq!(parsed.selector(), SELECTOR_MESSAGES_SUPPORTED);
        assert_eq!(parsed.payload(), &VendorPayload::MessagesSupported(caps));
    }

    #[test]
    fn roundtrip_hops_flow() {
        let msg = VendorMessage::hops_flow(2);
        let mut payload = Vec::new();
        msg.write_payload(&mut payload);

        let Message::Vendor(parsed) = decode(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(parsed.payload(), &VendorPayload::HopsFlow { max_ttl: 2 });
    }

    #[test]
    fn unknown_pair_roundtrips_opaquely() {
        let msg = VendorMessage::opaque(*b"GTKG", 7, 3, vec![1, 2, 3, 4]);
        let mut payload = Vec::new();
        msg.write_payload(&mut payload);

        let Message::Vendor(parsed) = decode(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(parsed.vendor(), *b"GTKG");
        assert_eq!(parsed.version(), 3);
        assert_eq!(parsed.payload(), &VendorPayload::Opaque(vec![1, 2, 3, 4]));

        let mut reencoded = Vec::new();
        parsed.write_payload(&mut reencoded);
        assert_eq!(reencoded, payload);
    }

    #[test]
    fn rejects_short_prefix() {
        assert_eq!(
            decode(&[0u8; 5]).unwrap_err(),
            BadPacketError::InvalidVendorEnvelope("prefix too short")
        );
    }

    #[test]
    fn rejects_truncated_capability_list() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&VENDOR_LIME);
        payload.extend_from_slice(&SELECTOR_MESSAGES_SUPPORTED.to_le_bytes());
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&3u16.to_le_bytes()); // claims 3 entries
        payload.extend_from_slice(&[0u8; 8]); // only one present
        assert_eq!(
            decode(&payload).unwrap_err(),
            BadPacketError::InvalidVendorEnvelope("truncated capability list")
        );
    }
}
