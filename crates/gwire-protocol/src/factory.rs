//! The dispatch factory.
//!
//! A [`MessageFactory`] owns the table mapping wire type codes to payload
//! codecs, plus the [`Config`] every codec decides with. One factory is
//! built at startup and shared; there is no process-wide registration
//! state, so two factories with different tables can coexist (e.g. a
//! stricter one for UDP traffic).

use std::collections::HashMap;
use std::io::{self, Read};

use tracing::warn;

use gwire_core::config::Config;
use gwire_core::constants::HEADER_SIZE;
use gwire_core::error::{BadPacketError, FrameError, ReadError};

use crate::ggep::{keys, GgepBlock};
use crate::header::{MessageHeader, MessageType, Network};
use crate::messages::ping::PingCodec;
use crate::messages::pong::PongCodec;
use crate::messages::push::PushCodec;
use crate::messages::query::QueryCodec;
use crate::messages::query_hit::QueryHitCodec;
use crate::messages::vendor::VendorCodec;
use crate::messages::{Message, MessageCodec};

/// Reads, decodes, and encodes messages of every registered kind.
pub struct MessageFactory {
    config: Config,
    codecs: HashMap<u8, Box<dyn MessageCodec>>,
    pong_template: GgepBlock,
}

impl MessageFactory {
    /// A factory with an empty codec table. Only useful as a base for
    /// custom registration.
    pub fn new(config: Config) -> Self {
        // Extensions every locally built pong starts from, computed once.
        let mut pong_template = GgepBlock::allowing_nulls();
        pong_template.put(keys::VENDOR_INFO, b"GWIR\x10");

        MessageFactory {
            config,
            codecs: HashMap::new(),
            pong_template,
        }
    }

    /// A factory with all built-in codecs registered.
    pub fn with_defaults(config: Config) -> Self {
        let mut factory = MessageFactory::new(config);
        factory.register(MessageType::Ping.code(), Box::new(PingCodec));
        factory.register(MessageType::Pong.code(), Box::new(PongCodec));
        factory.register(MessageType::Query.code(), Box::new(QueryCodec));
        factory.register(MessageType::QueryReply.code(), Box::new(QueryHitCodec));
        factory.register(MessageType::Push.code(), Box::new(PushCodec));
        factory.register(MessageType::Vendor.code(), Box::new(VendorCodec::new()));
        factory.register(MessageType::VendorStable.code(), Box::new(VendorCodec::new()));
        factory
    }

    /// Registers a codec for a type code. Last writer wins; replacing an
    /// existing codec is legal but suspicious enough to log.
    pub fn register(&mut self, code: u8, codec: Box<dyn MessageCodec>) {
        if self.codecs.insert(code, codec).is_some() {
            warn!(code, "replacing registered message codec");
        }
    }

    /// The configuration this factory decides with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The GGEP entries locally built pongs start from.
    pub fn pong_template(&self) -> &GgepBlock {
        &self.pong_template
    }

    /// Reads one message from `src`.
    ///
    /// `Ok(None)` means no bytes were available yet. A [`FrameError`] means
    /// the stream is beyond recovery and must be closed; a
    /// [`BadPacketError`] means this one message was dropped with the
    /// stream still in sync, so the caller just reads again.
    pub fn read(&self, src: &mut impl Read, network: Network) -> Result<Option<Message>, ReadError> {
        let header = match MessageHeader::read(src, self.config.max_message_size) {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // The payload is consumed before any per-message rejection so the
        // stream stays positioned at the next header.
        let mut payload = vec![0u8; header.payload_length() as usize];
        self.read_payload(src, &mut payload)?;

        let header = header.validate(self.config.soft_max)?.with_network(network);
        Ok(Some(self.decode(header, &payload)?))
    }

    fn read_payload(&self, src: &mut impl Read, payload: &mut [u8]) -> Result<(), FrameError> {
        let expected = payload.len();
        let mut n = 0;
        while n < expected {
            match src.read(&mut payload[n..]) {
                Ok(0) => return Err(FrameError::PayloadTruncated { expected, got: n }),
                Ok(m) => n += m,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Dispatches an already framed payload to the codec for its type.
    pub fn decode(&self, header: MessageHeader, payload: &[u8]) -> Result<Message, BadPacketError> {
        let codec = self
            .codecs
            .get(&header.type_code())
            .ok_or(BadPacketError::UnknownType(header.type_code()))?;
        codec.decode(header, payload, &self.config)
    }

    /// Serializes a message: header with the payload length filled in,
    /// then the payload.
    pub fn encode(&self, message: &Message) -> Vec<u8> {
        let mut payload = Vec::new();
        message.write_payload(&mut payload);
        let header = message.header().with_payload_length(payload.len() as u32);
        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        header.write(&mut out);
        out.extend_from_slice(&payload);
        out
    }
}
