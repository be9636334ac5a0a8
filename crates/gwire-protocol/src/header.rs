//! The fixed 23-byte message header and the relay hygiene rules.
//!
//! Every message starts with a 16-byte GUID, a type code byte, a ttl byte,
//! a hops byte, and a little-endian 4-byte payload length. The header also
//! carries the two relay counters the network polices: ttl + hops may never
//! exceed the hard ceiling of 14, and request types arriving over a
//! connection are additionally held to that connection's soft ceiling.

use std::io::{self, Read};

use byteorder::{ByteOrder, LittleEndian};

use gwire_core::constants::{GUID_SIZE, HARD_MAX, HEADER_SIZE};
use gwire_core::error::{BadPacketError, FrameError};

use crate::guid::Guid;

/// The seven message kinds and their wire type codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Keep-alive and host discovery probe.
    Ping,
    /// Reply to a ping, announcing an address and shared-library size.
    Pong,
    /// Vendor-specific message, negotiated per connection.
    Vendor,
    /// Vendor-specific message with a stable, documented format.
    VendorStable,
    /// Request that a firewalled host open a connection outward.
    Push,
    /// Keyword and URN search request.
    Query,
    /// Search results routed back toward the querier.
    QueryReply,
}

impl MessageType {
    /// The wire type code.
    pub fn code(self) -> u8 {
        match self {
            MessageType::Ping => 0x00,
            MessageType::Pong => 0x01,
            MessageType::Vendor => 0x31,
            MessageType::VendorStable => 0x32,
            MessageType::Push => 0x40,
            MessageType::Query => 0x80,
            MessageType::QueryReply => 0x81,
        }
    }

    /// True for kinds that travel the reverse path of an earlier request.
    /// Replies are exempt from the soft ceiling: they only come back along
    /// routes we opened, so high hop counts are legitimate.
    pub fn is_reply(self) -> bool {
        matches!(self, MessageType::Pong | MessageType::QueryReply)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = BadPacketError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x00 => Ok(MessageType::Ping),
            0x01 => Ok(MessageType::Pong),
            0x31 => Ok(MessageType::Vendor),
            0x32 => Ok(MessageType::VendorStable),
            0x40 => Ok(MessageType::Push),
            0x80 => Ok(MessageType::Query),
            0x81 => Ok(MessageType::QueryReply),
            other => Err(BadPacketError::UnknownType(other)),
        }
    }
}

/// The transport a message arrived over. Not on the wire; recorded at read
/// time so payload codecs can apply transport-specific rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Network {
    /// A slot-based TCP connection.
    Tcp,
    /// A datagram, e.g. an out-of-band query hit.
    Udp,
    /// Local-network multicast.
    Multicast,
    /// Built locally or origin unknown.
    #[default]
    Unknown,
}

/// A parsed message header.
///
/// The type is kept as the raw code byte so that frames of unrecognized
/// kinds can still be framed and skipped; [`MessageHeader::message_type`]
/// converts it on demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    guid: Guid,
    type_code: u8,
    ttl: u8,
    hops: u8,
    payload_length: u32,
    network: Network,
}

impl MessageHeader {
    /// Makes a header for a locally built message: zero hops, zero payload
    /// length until encoding fills it in.
    pub fn new(guid: Guid, message_type: MessageType, ttl: u8) -> Self {
        MessageHeader {
            guid,
            type_code: message_type.code(),
            ttl,
            hops: 0,
            payload_length: 0,
            network: Network::Unknown,
        }
    }

    /// Reads one header from `src`.
    ///
    /// Returns `Ok(None)` only when the source signals would-block or
    /// timeout before a single byte arrived; the caller retries later. Once
    /// any byte of a header has been consumed, an interruption is fatal
    /// because the stream cannot be resynchronized.
    pub fn read(src: &mut impl Read, max_message_size: usize) -> Result<Option<Self>, FrameError> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut n = 0;
        while n < HEADER_SIZE {
            match src.read(&mut buf[n..]) {
                Ok(0) => return Err(FrameError::HeaderTruncated(n)),
                Ok(m) => n += m,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    if n == 0 {
                        return Ok(None);
                    }
                    return Err(FrameError::HeaderTruncated(n));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut guid = [0u8; GUID_SIZE];
        guid.copy_from_slice(&buf[..GUID_SIZE]);
        let payload_length = LittleEndian::read_u32(&buf[19..23]);
        if payload_length as usize > max_message_size {
            return Err(FrameError::LengthOutOfRange(payload_length as usize));
        }

        Ok(Some(MessageHeader {
            guid: Guid::from_bytes(guid),
            type_code: buf[16],
            ttl: buf[17],
            hops: buf[18],
            payload_length,
            network: Network::Unknown,
        }))
    }

    /// Appends the 23 header bytes to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.guid.as_bytes());
        out.push(self.type_code);
        out.push(self.ttl);
        out.push(self.hops);
        out.extend_from_slice(&self.payload_length.to_le_bytes());
    }

    /// Applies the relay hygiene policy to a freshly read header and
    /// returns the header to proceed with.
    ///
    /// Checks run in a fixed order:
    /// 1. a request whose hop count already exceeds `soft_max` is rejected;
    /// 2. a request with ttl + hops over `soft_max` has its ttl clamped so
    ///    the total lands exactly on `soft_max`;
    /// 3. anything still over the hard ceiling is rejected as spam.
    ///
    /// Older servents checked the hard ceiling first and dropped such
    /// messages outright. Here the clamp deliberately runs first, so a
    /// request that can be brought down to `soft_max` is salvaged rather
    /// than dropped; the ceiling still catches replies and requests the
    /// clamp could not lower.
    pub fn validate(&self, soft_max: u8) -> Result<Self, BadPacketError> {
        let is_reply = MessageType::try_from(self.type_code).map_or(false, MessageType::is_reply);
        let mut out = *self;

        if !is_reply {
            if self.hops > soft_max {
                return Err(BadPacketError::HopsExceedSoftMax { hops: self.hops, soft_max });
            }
            if u16::from(self.ttl) + u16::from(self.hops) > u16::from(soft_max) {
                out.ttl = soft_max - self.hops;
            }
        }
        if u16::from(out.ttl) + u16::from(out.hops) > u16::from(HARD_MAX) {
            return Err(BadPacketError::OverHardMax { ttl: self.ttl, hops: self.hops });
        }
        Ok(out)
    }

    /// Records one hop of forwarding: hops goes up and, if ttl was still
    /// positive, ttl comes down. Returns the advanced header together with
    /// the ttl the message had before the hop, which is what the relay
    /// decision keys on.
    pub fn hop(&self) -> (Self, u8) {
        let mut next = *self;
        next.hops = next.hops.saturating_add(1);
        if next.ttl > 0 {
            next.ttl -= 1;
        }
        (next, self.ttl)
    }

    /// The message GUID.
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// The raw type code byte.
    pub fn type_code(&self) -> u8 {
        self.type_code
    }

    /// The type code resolved to a known kind.
    pub fn message_type(&self) -> Result<MessageType, BadPacketError> {
        MessageType::try_from(self.type_code)
    }

    /// Hops this message may still travel.
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Hops this message has already traveled.
    pub fn hops(&self) -> u8 {
        self.hops
    }

    /// Payload length announced by the header.
    pub fn payload_length(&self) -> u32 {
        self.payload_length
    }

    /// The transport this header arrived over.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Copy with the payload length set; used when encoding.
    pub fn with_payload_length(mut self, len: u32) -> Self {
        self.payload_length = len;
        self
    }

    /// Copy annotated with the arrival transport.
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Copy with a different ttl.
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Copy with a different hop count.
    pub fn with_hops(mut self, hops: u8) -> Self {
        self.hops = hops;
        self
    }
}
