//! Pings.
//!
//! A classic ping has no payload at all. Modern pings may carry a GGEP
//! block: `SCP` asks the receiver to pack cached host addresses into its
//! pong, and `IP` (sent over UDP) asks the receiver to echo back the
//! sender's external address.

use tracing::debug;

use gwire_core::config::Config;
use gwire_core::error::BadPacketError;

use crate::ggep::{keys, GgepBlock};
use crate::guid::Guid;
use crate::header::{MessageHeader, MessageType};
use crate::messages::{Message, MessageCodec};

/// A keep-alive and host discovery probe.
#[derive(Clone, Debug)]
pub struct PingRequest {
    header: MessageHeader,
    ggep: GgepBlock,
}

impl PingRequest {
    /// A plain ping with an empty payload.
    pub fn new(ttl: u8) -> Self {
        // A ping's extensions end the payload, so zero bytes are fine and
        // COBS stuffing is unnecessary.
        PingRequest {
            header: MessageHeader::new(Guid::new(), MessageType::Ping, ttl),
            ggep: GgepBlock::allowing_nulls(),
        }
    }

    /// A ping asking the receiver to pack cached host addresses into its
    /// pong. The value byte says which kind of slots the sender is after.
    pub fn with_cached_pong_request(ttl: u8, wants_ultrapeer_slots: bool) -> Self {
        let mut ping = PingRequest::new(ttl);
        ping.ggep
            .put(keys::SUPPORTS_CACHED_PONGS, &[u8::from(wants_ultrapeer_slots)]);
        ping
    }

    /// A ttl-1 ping sent over UDP asking the receiver to echo the sender's
    /// external address in its pong.
    pub fn with_address_request() -> Self {
        let mut ping = PingRequest::new(1);
        ping.ggep.put_flag(keys::IPPORT);
        ping
    }

    /// The shared header.
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Mutable access to the shared header, e.g. to install a hopped copy.
    pub fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    /// The extension block, empty for a classic ping.
    pub fn ggep(&self) -> &GgepBlock {
        &self.ggep
    }

    /// True when the sender wants cached host addresses in the pong.
    pub fn requests_cached_pongs(&self) -> bool {
        self.ggep.contains(keys::SUPPORTS_CACHED_PONGS)
    }

    /// Whether the sender is after ultrapeer slots, when it said either way.
    pub fn prefers_ultrapeer_slots(&self) -> Option<bool> {
        self.ggep
            .get(keys::SUPPORTS_CACHED_PONGS)
            .and_then(|v| v.first())
            .map(|&b| b & 0x1 != 0)
    }

    /// True when the sender wants its external address echoed back.
    pub fn requests_address(&self) -> bool {
        self.ggep.contains(keys::IPPORT)
    }

    pub(crate) fn from_wire(header: MessageHeader, ggep: GgepBlock) -> Self {
        PingRequest { header, ggep }
    }

    /// Appends the payload bytes: nothing for a classic ping, a GGEP block
    /// otherwise.
    pub fn write_payload(&self, out: &mut Vec<u8>) {
        self.ggep.write(out);
    }
}

/// Decodes ping payloads.
pub struct PingCodec;

impl MessageCodec for PingCodec {
    fn decode(
        &self,
        header: MessageHeader,
        payload: &[u8],
        _config: &Config,
    ) -> Result<Message, BadPacketError> {
        let ggep = if payload.is_empty() {
            GgepBlock::new()
        } else {
            // A broken extension block degrades to a plain ping; the ping
            // itself is still answerable.
            match GgepBlock::parse(payload, 0) {
                Ok((block, _)) => block,
                Err(err) => {
                    debug!(%err, "ignoring malformed ping extensions");
                    GgepBlock::new()
                }
            }
        };
        Ok(Message::Ping(PingRequest::from_wire(header, ggep)))
    }
}
