#![warn(missing_docs)]

//! Gwire: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports
//! the most commonly used types for speaking the Gnutella wire format:
//!
//! - The dispatch factory and its configuration (`MessageFactory`, `Config`)
//! - The typed messages (`Message`, `PingRequest`, `QueryReply`, ...)
//! - The header and extension codecs (`MessageHeader`, `GgepBlock`, ...)
//!
//! Example
//! ```ignore
//! use gwire::{Config, Message, MessageFactory, Network, QueryRequest};
//! use std::io::Cursor;
//!
//! let factory = MessageFactory::with_defaults(Config::default());
//!
//! // Encode a query and read it back as if it arrived off a connection.
//! let wire = factory.encode(&Message::Query(QueryRequest::new(4, "orange juice")));
//! let mut stream = Cursor::new(wire);
//!
//! if let Some(Message::Query(query)) = factory.read(&mut stream, Network::Tcp).unwrap() {
//!     assert_eq!(query.query(), "orange juice");
//! }
//! ```

// Core config and errors
pub use gwire_core::config::Config;
pub use gwire_core::error::{
    BadGgepBlockError, BadGgepPropertyError, BadPacketError, FrameError, ReadError,
};
// Protocol: framing, extensions, typed messages, dispatch
pub use gwire_protocol::factory::MessageFactory;
pub use gwire_protocol::ggep::GgepBlock;
pub use gwire_protocol::guid::Guid;
pub use gwire_protocol::header::{MessageHeader, MessageType, Network};
pub use gwire_protocol::huge::HugeExtension;
pub use gwire_protocol::messages::{
    Message, PingReply, PingRequest, PushRequest, QueryReply, QueryRequest, Response,
    VendorMessage, VendorPayload,
};
pub use gwire_protocol::urn::{Urn, UrnKind, UrnType};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Config, GgepBlock, Guid, Message, MessageFactory, MessageHeader, MessageType, Network,
        PingReply, PingRequest, PushRequest, QueryReply, QueryRequest, ReadError, Response, Urn,
        VendorMessage, VendorPayload,
    };
}
