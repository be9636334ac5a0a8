#![warn(missing_docs)]

//! gwire-protocol: message framing, extension codecs, and payload codecs.
//!
//! Raw bytes flow in one direction through this crate: the header is
//! parsed, the dispatch factory picks a per-type codec, the codec pulls
//! apart the payload (with GGEP and HUGE helpers where the format embeds
//! them), and out comes a typed [`Message`](messages::Message). Encoding
//! runs the same path in reverse. Everything is synchronous and stateless
//! per call; the only shared state is the factory's registration table,
//! built once at startup.

/// The dispatch factory mapping type codes to codecs.
pub mod factory;
/// The self-describing key/value extension block codec.
pub mod ggep;
/// Message GUIDs.
pub mod guid;
/// The fixed 23-byte message header and its validation policy.
pub mod header;
/// The composite extension parser for query extension runs.
pub mod huge;
/// Typed message variants and their payload codecs.
pub mod messages;
/// Typed content identifiers (urn:sha1, urn:bitprint).
pub mod urn;

pub use factory::MessageFactory;
pub use ggep::GgepBlock;
pub use guid::Guid;
pub use header::{MessageHeader, MessageType, Network};
pub use huge::HugeExtension;
pub use messages::Message;
pub use urn::{Urn, UrnKind, UrnType};
