use crate::constants::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_SOFT_MAX};

#[derive(Clone, Debug)]
/// Configuration options to tune codec behavior.
///
/// One `Config` is built at startup and handed by reference to the message
/// factory and codecs. There is no ambient global state; everything a codec
/// needs to decide with lives here.
pub struct Config {
    /// Max declared payload length in bytes. A header announcing more than
    /// this is treated as a stream-fatal framing error.
    pub max_message_size: usize,
    /// Per-connection ceiling on ttl + hops for relayed request types.
    /// Replies (pongs and query hits) are exempt.
    pub soft_max: u8,
    /// Characters that may not appear in query text received from the
    /// network. Queries carrying any of these are rejected.
    pub illegal_query_chars: Vec<char>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            soft_max: DEFAULT_SOFT_MAX,
            illegal_query_chars: vec!['_', '#', '!', '|', '?', '<', '>', '^', '+', ';'],
        }
    }
}
