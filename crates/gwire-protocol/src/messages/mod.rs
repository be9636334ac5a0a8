//! The typed message variants and their payload codecs.
//!
//! Each kind lives in its own module: the struct, its builders, its
//! accessors, and a codec implementing [`MessageCodec`] for the factory to
//! dispatch to. The closed sum type [`Message`] is what a read ultimately
//! produces; every variant embeds the shared [`MessageHeader`].

/// Keep-alive and host discovery probes.
pub mod ping;
/// Address and shared-library announcements answering pings.
pub mod pong;
/// Requests that a firewalled host connect outward.
pub mod push;
/// Keyword and URN search requests.
pub mod query;
/// Search results routed back toward the querier.
pub mod query_hit;
/// Vendor-specific messages and their sub-codec table.
pub mod vendor;

use gwire_core::config::Config;
use gwire_core::error::BadPacketError;

use crate::header::{MessageHeader, MessageType};

pub use ping::PingRequest;
pub use pong::PingReply;
pub use push::PushRequest;
pub use query::QueryRequest;
pub use query_hit::{QueryReply, Response};
pub use vendor::{VendorMessage, VendorPayload};

/// Any message the factory can produce.
#[derive(Clone, Debug)]
pub enum Message {
    /// A ping.
    Ping(PingRequest),
    /// A pong.
    Pong(PingReply),
    /// A search request.
    Query(QueryRequest),
    /// A bundle of search results.
    QueryHit(QueryReply),
    /// A push-connect request.
    Push(PushRequest),
    /// A vendor-specific message.
    Vendor(VendorMessage),
}

impl Message {
    /// The shared header.
    pub fn header(&self) -> &MessageHeader {
        match self {
            Message::Ping(m) => m.header(),
            Message::Pong(m) => m.header(),
            Message::Query(m) => m.header(),
            Message::QueryHit(m) => m.header(),
            Message::Push(m) => m.header(),
            Message::Vendor(m) => m.header(),
        }
    }

    /// Mutable access to the shared header, e.g. to install a hopped copy.
    pub fn header_mut(&mut self) -> &mut MessageHeader {
        match self {
            Message::Ping(m) => m.header_mut(),
            Message::Pong(m) => m.header_mut(),
            Message::Query(m) => m.header_mut(),
            Message::QueryHit(m) => m.header_mut(),
            Message::Push(m) => m.header_mut(),
            Message::Vendor(m) => m.header_mut(),
        }
    }

    /// The kind of this message.
    pub fn kind(&self) -> MessageType {
        match self {
            Message::Ping(_) => MessageType::Ping,
            Message::Pong(_) => MessageType::Pong,
            Message::Query(_) => MessageType::Query,
            Message::QueryHit(_) => MessageType::QueryReply,
            Message::Push(_) => MessageType::Push,
            // A vendor message keeps its header's code, which may be the
            // stable variant.
            Message::Vendor(m) => m
                .header()
                .message_type()
                .unwrap_or(MessageType::Vendor),
        }
    }

    /// Appends this message's payload bytes to `out`.
    pub fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            Message::Ping(m) => m.write_payload(out),
            Message::Pong(m) => m.write_payload(out),
            Message::Query(m) => m.write_payload(out),
            Message::QueryHit(m) => m.write_payload(out),
            Message::Push(m) => m.write_payload(out),
            Message::Vendor(m) => m.write_payload(out),
        }
    }
}

/// A payload decoder for one message kind, dispatched to by the factory.
///
/// Implementations receive the already validated header and the complete
/// payload; they never touch the stream.
pub trait MessageCodec: Send + Sync {
    /// Decodes a payload into a typed message.
    fn decode(
        &self,
        header: MessageHeader,
        payload: &[u8],
        config: &Config,
    ) -> Result<Message, BadPacketError>;
}
