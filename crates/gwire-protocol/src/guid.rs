use std::fmt;

use gwire_core::constants::GUID_SIZE;

/// A 16-byte message identifier.
///
/// Globally unique per message; a request and the replies routed back to it
/// share the same GUID. Freshly built messages get a random GUID with the
/// modern-client marker bytes set; messages reconstructed from the network
/// keep their GUID verbatim.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid([u8; GUID_SIZE]);

impl Guid {
    /// Generates a fresh random GUID.
    ///
    /// Byte 8 is 0xFF and byte 15 is 0x00, the convention marking the
    /// sender as a current-generation client.
    pub fn new() -> Self {
        let mut bytes: [u8; GUID_SIZE] = rand::random();
        bytes[8] = 0xFF;
        bytes[15] = 0x00;
        Guid(bytes)
    }

    /// Wraps GUID bytes copied verbatim from a received header.
    pub fn from_bytes(bytes: [u8; GUID_SIZE]) -> Self {
        Guid(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; GUID_SIZE] {
        &self.0
    }
}

impl Default for Guid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_guid_has_marker_bytes() {
        let guid = Guid::new();
        assert_eq!(guid.as_bytes()[8], 0xFF);
        assert_eq!(guid.as_bytes()[15], 0x00);
    }

    #[test]
    fn from_bytes_is_verbatim() {
        let raw = [7u8; 16];
        assert_eq!(Guid::from_bytes(raw).as_bytes(), &raw);
    }

    #[test]
    fn display_is_hex() {
        let guid = Guid::from_bytes([0xAB; 16]);
        assert_eq!(guid.to_string(), "AB".repeat(16));
    }
}
