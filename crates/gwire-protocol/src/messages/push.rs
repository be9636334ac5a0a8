//! Push-connect requests.
//!
//! When a responder is firewalled, the downloader sends a push carrying the
//! responder's client GUID, the wanted file index, and the downloader's own
//! address; the responder then opens the connection outward. The payload is
//! a fixed 26 bytes. One file index value is reserved: it asks for a
//! firewall-to-firewall transfer instead of an ordinary upload.

use std::net::{Ipv4Addr, SocketAddrV4};

use byteorder::{ByteOrder, LittleEndian};

use gwire_core::config::Config;
use gwire_core::constants::{FW_TRANS_INDEX, GUID_SIZE, PUSH_PAYLOAD_SIZE};
use gwire_core::error::BadPacketError;

use crate::guid::Guid;
use crate::header::{MessageHeader, MessageType};
use crate::messages::{Message, MessageCodec};

/// A request that a firewalled host open a connection outward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushRequest {
    header: MessageHeader,
    client_guid: Guid,
    index: u32,
    addr: SocketAddrV4,
}

impl PushRequest {
    /// A push asking `client_guid` to connect to `addr` and upload the file
    /// at `index`.
    pub fn new(ttl: u8, client_guid: Guid, index: u32, addr: SocketAddrV4) -> Self {
        PushRequest {
            header: MessageHeader::new(Guid::new(), MessageType::Push, ttl),
            client_guid,
            index,
            addr,
        }
    }

    /// A push asking for a firewall-to-firewall transfer rather than an
    /// ordinary upload.
    pub fn new_fw_transfer(ttl: u8, client_guid: Guid, addr: SocketAddrV4) -> Self {
        PushRequest::new(ttl, client_guid, FW_TRANS_INDEX, addr)
    }

    /// The shared header.
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Mutable access to the shared header, e.g. to install a hopped copy.
    pub fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    /// The GUID of the client being asked to push.
    pub fn client_guid(&self) -> Guid {
        self.client_guid
    }

    /// The index of the wanted file in the responder's library.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Where the pushed connection should go.
    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    /// True when this push asks for a firewall-to-firewall transfer.
    pub fn is_fw_transfer(&self) -> bool {
        self.index == FW_TRANS_INDEX
    }

    /// Appends the fixed 26 payload bytes.
    pub fn write_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.client_guid.as_bytes());
        out.extend_from_slice(&self.index.to_le_bytes());
        out.extend_from_slice(&self.addr.ip().octets());
        out.extend_from_slice(&self.addr.port().to_le_bytes());
    }
}

/// Decodes push payloads.
pub struct PushCodec;

impl MessageCodec for PushCodec {
    fn decode(
        &self,
        header: MessageHeader,
        payload: &[u8],
        _config: &Config,
    ) -> Result<Message, BadPacketError> {
        if payload.len() < PUSH_PAYLOAD_SIZE {
            return Err(BadPacketError::PayloadTooSmall(payload.len()));
        }
        let mut guid = [0u8; GUID_SIZE];
        guid.copy_from_slice(&payload[..GUID_SIZE]);
        let index = LittleEndian::read_u32(&payload[16..20]);
        let ip = Ipv4Addr::new(payload[20], payload[21], payload[22], payload[23]);
        let port = LittleEndian::read_u16(&payload[24..26]);

        if port == 0 {
            return Err(BadPacketError::InvalidPort(port));
        }
        if ip.is_unspecified() || ip.is_broadcast() {
            return Err(BadPacketError::InvalidAddress(ip.to_string()));
        }

        Ok(Message::Push(PushRequest {
            header,
            client_guid: Guid::from_bytes(guid),
            index,
            addr: SocketAddrV4::new(ip, port),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 6346)
    }

    fn decode(payload: &[u8]) -> Result<Message, BadPacketError> {
        let header = MessageHeader::new(Guid::new(), MessageType::Push, 5);
        PushCodec.decode(header, payload, &Config::default())
    }

    #[test]
    fn roundtrip() {
        let client = Guid::new();
        let push = PushRequest::new(5, client, 42, addr());
        let mut payload = Vec::new();
        push.write_payload(&mut payload);
        assert_eq!(payload.len(), PUSH_PAYLOAD_SIZE);

        let Message::Push(parsed) = decode(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(parsed.client_guid(), client);
        assert_eq!(parsed.index(), 42);
        assert_eq!(parsed.addr(), addr());
        assert!(!parsed.is_fw_transfer());
    }

    #[test]
    fn fw_transfer_sentinel() {
        let push = PushRequest::new_fw_transfer(5, Guid::new(), addr());
        let mut payload = Vec::new();
        push.write_payload(&mut payload);
        let Message::Push(parsed) = decode(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert!(parsed.is_fw_transfer());
        assert_eq!(parsed.index(), FW_TRANS_INDEX);
    }

    #[test]
    fn rejects_short_payload() {
        assert_eq!(
            decode(&[0u8; 20]).unwrap_err(),
            BadPacketError::PayloadTooSmall(20)
        );
    }

    #[test]
    fn rejects_zero_port() {
        let push = PushRequest::new(1, Guid::new(), 1, addr());
        let mut payload = Vec::new();
        push.write_payload(&mut payload);
        payload[24] = 0;
        payload[25] = 0;
        assert_eq!(decode(&payload).unwrap_err(), BadPacketError::InvalidPort(0));
    }

    #[test]
    fn rejects_unspecified_address() {
        let bad = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 6346);
        let push = PushRequest::new(1, Guid::new(), 1, bad);
        let mut payload = Vec::new();
        push.write_payload(&mut payload);
        assert!(matches!(
            decode(&payload).unwrap_err(),
            BadPacketError::InvalidAddress(_)
        ));
    }
}
