//! Pongs.
//!
//! The fixed 14-byte body carries the responder's port, IPv4 address, file
//! count, and shared-library size in kilobytes. Everything else rides in an
//! optional GGEP block: uptime, ultrapeer slot counts, vendor code, locale,
//! packed host lists, and UDP-host-cache announcements.

use std::net::{Ipv4Addr, SocketAddrV4};

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use gwire_core::config::Config;
use gwire_core::constants::PONG_STANDARD_PAYLOAD_SIZE;
use gwire_core::error::BadPacketError;

use crate::ggep::{keys, GgepBlock};
use crate::guid::Guid;
use crate::header::{MessageHeader, MessageType};
use crate::messages::{Message, MessageCodec};

/// A ping reply announcing a host's address and shared library.
#[derive(Clone, Debug)]
pub struct PingReply {
    header: MessageHeader,
    port: u16,
    addr: Ipv4Addr,
    files: u32,
    kbytes: u32,
    ggep: GgepBlock,
}

impl PingReply {
    /// A pong for an ordinary leaf host. `guid` is the GUID of the ping
    /// being answered, so the pong routes back along its path.
    pub fn new(guid: Guid, ttl: u8, addr: SocketAddrV4, files: u32, kbytes: u32) -> Self {
        PingReply {
            header: MessageHeader::new(guid, MessageType::Pong, ttl),
            port: addr.port(),
            addr: *addr.ip(),
            files,
            kbytes,
            // The block ends the payload; zero bytes are fine here.
            ggep: GgepBlock::allowing_nulls(),
        }
    }

    /// A pong for an ultrapeer. The library size is rounded up to a power
    /// of two of at least 8, the in-band marking old clients recognize, and
    /// the `UP` extension advertises free slots to new ones.
    pub fn new_ultrapeer(
        guid: Guid,
        ttl: u8,
        addr: SocketAddrV4,
        files: u32,
        kbytes: u32,
        free_leaf_slots: u8,
        free_ultrapeer_slots: u8,
    ) -> Self {
        let mut pong = PingReply::new(guid, ttl, addr, files, kbytes.max(8).next_power_of_two());
        pong.ggep
            .put(keys::ULTRAPEER, &[1, free_leaf_slots, free_ultrapeer_slots]);
        pong
    }

    /// Merges a prebuilt block of extensions, e.g. a factory template.
    pub fn with_extensions(mut self, extensions: &GgepBlock) -> Self {
        self.ggep.merge(extensions.clone());
        self
    }

    /// Adds the average daily uptime in seconds.
    pub fn with_daily_uptime(mut self, seconds: u32) -> Self {
        self.ggep.put_u32(keys::DAILY_UPTIME, seconds);
        self
    }

    /// Adds the vendor code (4 ASCII characters) and a packed version byte.
    pub fn with_vendor(mut self, vendor: &str, version: u8) -> Self {
        let mut value = vendor.as_bytes().to_vec();
        value.push(version);
        self.ggep.put(keys::VENDOR_INFO, &value);
        self
    }

    /// Adds the responder's locale and how many more hosts of that locale
    /// it wants to hear about.
    pub fn with_locale(mut self, locale: &str, wanted: u8) -> Self {
        let mut value = locale.as_bytes().to_vec();
        value.push(wanted);
        self.ggep.put(keys::CLIENT_LOCALE, &value);
        self
    }

    /// Announces this host as a UDP host cache reachable at `name`.
    pub fn with_udp_host_cache(mut self, name: &str) -> Self {
        self.ggep.put_str(keys::UDP_HOST_CACHE, name);
        self
    }

    /// Echoes the pinger's external address back, answering a ping that
    /// asked for it.
    pub fn with_external_address(mut self, addr: SocketAddrV4) -> Self {
        self.ggep.put(keys::IPPORT, &pack_ipports(&[addr]));
        self
    }

    /// Packs other known host addresses into the pong.
    pub fn with_packed_hosts(mut self, hosts: &[SocketAddrV4]) -> Self {
        self.ggep.put(keys::PACKED_IPPORTS, &pack_ipports(hosts));
        self
    }

    /// Packs known UDP host cache endpoints, one per line.
    pub fn with_packed_host_caches(mut self, caches: &[String]) -> Self {
        self.ggep
            .put_str(keys::PACKED_HOST_CACHES, &caches.join("\n"));
        self
    }

    /// The shared header.
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Mutable access to the shared header, e.g. to install a hopped copy.
    pub fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    /// The responder's listening port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The responder's IPv4 address as carried in the body.
    pub fn address(&self) -> Ipv4Addr {
        self.addr
    }

    /// The body address and port together.
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr, self.port)
    }

    /// Number of files the responder shares.
    pub fn files(&self) -> u32 {
        self.files
    }

    /// Size of the shared library in kilobytes.
    pub fn kbytes(&self) -> u32 {
        self.kbytes
    }

    /// The extension block.
    pub fn ggep(&self) -> &GgepBlock {
        &self.ggep
    }

    /// Average daily uptime in seconds, when advertised.
    pub fn daily_uptime(&self) -> Option<u32> {
        self.ggep.u32_value(keys::DAILY_UPTIME).ok()
    }

    /// True when the responder advertises itself as an ultrapeer.
    pub fn is_ultrapeer(&self) -> bool {
        self.ggep.contains(keys::ULTRAPEER)
    }

    /// Free leaf and ultrapeer slots, when advertised.
    pub fn free_slots(&self) -> Option<(u8, u8)> {
        let v = self.ggep.get(keys::ULTRAPEER)?;
        if v.len() < 3 {
            return None;
        }
        Some((v[1], v[2]))
    }

    /// Vendor code and packed version byte, when advertised.
    pub fn vendor(&self) -> Option<(String, u8)> {
        let v = self.ggep.get(keys::VENDOR_INFO)?;
        if v.len() < 5 {
            return None;
        }
        let code = std::str::from_utf8(&v[..4]).ok()?;
        Some((code.to_owned(), v[4]))
    }

    /// Locale and wanted-host count, when advertised.
    pub fn locale(&self) -> Option<(String, u8)> {
        let v = self.ggep.get(keys::CLIENT_LOCALE)?;
        let (&wanted, locale) = v.split_last()?;
        Some((std::str::from_utf8(locale).ok()?.to_owned(), wanted))
    }

    /// The pinger's external address as the responder saw it, when echoed.
    pub fn external_address(&self) -> Option<SocketAddrV4> {
        let v = self.ggep.get(keys::IPPORT)?;
        if v.len() != 6 {
            return None;
        }
        let ip = Ipv4Addr::new(v[0], v[1], v[2], v[3]);
        Some(SocketAddrV4::new(ip, LittleEndian::read_u16(&v[4..6])))
    }

    /// The UDP host cache name, when this pong announces one.
    pub fn udp_host_cache(&self) -> Option<&str> {
        self.ggep.string(keys::UDP_HOST_CACHE).ok()
    }

    /// The host to record for this pong: the UDP host cache name when one
    /// is announced, the body address otherwise.
    pub fn advertised_host(&self) -> String {
        match self.udp_host_cache() {
            Some(name) => name.to_owned(),
            None => self.addr.to_string(),
        }
    }

    /// Other host addresses packed into the pong.
    pub fn packed_hosts(&self) -> Vec<SocketAddrV4> {
        self.ggep
            .get(keys::PACKED_IPPORTS)
            .map(unpack_ipports)
            .unwrap_or_default()
    }

    /// Packed UDP host cache endpoints.
    pub fn packed_host_caches(&self) -> Vec<String> {
        match self.ggep.string(keys::PACKED_HOST_CACHES) {
            Ok(s) => s.lines().map(str::to_owned).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// True when the library size carries the legacy power-of-two
    /// ultrapeer marking.
    pub fn has_ultrapeer_marking(&self) -> bool {
        self.kbytes >= 8 && self.kbytes.is_power_of_two()
    }

    /// Appends the 14 body bytes and the extension block.
    pub fn write_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.port.to_le_bytes());
        out.extend_from_slice(&self.addr.octets());
        out.extend_from_slice(&self.files.to_le_bytes());
        out.extend_from_slice(&self.kbytes.to_le_bytes());
        self.ggep.write(out);
    }
}

/// 6 bytes per host: 4 address octets then the port little-endian.
fn pack_ipports(hosts: &[SocketAddrV4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(hosts.len() * 6);
    for host in hosts {
        out.extend_from_slice(&host.ip().octets());
        out.extend_from_slice(&host.port().to_le_bytes());
    }
    out
}

fn unpack_ipports(packed: &[u8]) -> Vec<SocketAddrV4> {
    packed
        .chunks_exact(6)
        .map(|c| {
            let ip = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
            SocketAddrV4::new(ip, LittleEndian::read_u16(&c[4..6]))
        })
        .collect()
}

fn valid_address(addr: Ipv4Addr) -> bool {
    !addr.is_unspecified() && !addr.is_broadcast()
}

/// Decodes pong payloads.
pub struct PongCodec;

impl MessageCodec for PongCodec {
    fn decode(
        &self,
        header: MessageHeader,
        payload: &[u8],
        _config: &Config,
    ) -> Result<Message, BadPacketError> {
        if payload.len() < PONG_STANDARD_PAYLOAD_SIZE {
            return Err(BadPacketError::PayloadTooSmall(payload.len()));
        }
        let port = LittleEndian::read_u16(&payload[0..2]);
        if port == 0 {
            return Err(BadPacketError::InvalidPort(port));
        }
        let addr = Ipv4Addr::new(payload[2], payload[3], payload[4], payload[5]);
        if !valid_address(addr) {
            return Err(BadPacketError::InvalidAddress(addr.to_string()));
        }
        let files = LittleEndian::read_u32(&payload[6..10]);
        let kbytes = LittleEndian::read_u32(&payload[10..14]);

        let ggep = if payload.len() > PONG_STANDARD_PAYLOAD_SIZE {
            match GgepBlock::parse(payload, PONG_STANDARD_PAYLOAD_SIZE) {
                Ok((block, _)) => block,
                Err(err) => {
                    debug!(%err, "ignoring malformed pong extensions");
                    GgepBlock::new()
                }
            }
        } else {
            GgepBlock::new()
        };

        Ok(Message::Pong(PingReply {
            header,
            port,
            addr,
            files,
            kbytes,
            ggep,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 6346)
    }

    fn decode(payload: &[u8]) -> Result<Message, BadPacketError> {
        let header = MessageHeader::new(Guid::new(), MessageType::Pong, 1);
        PongCodec.decode(header, payload, &Config::default())
    }

    #[test]
    fn roundtrip_plain_pong() {
        let pong = PingReply::new(Guid::new(), 3, addr(), 150, 2000);
        let mut payload = Vec::new();
        pong.write_payload(&mut payload);
        assert_eq!(payload.len(), PONG_STANDARD_PAYLOAD_SIZE);

        let Message::Pong(parsed) = decode(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(parsed.socket_addr(), addr());
        assert_eq!(parsed.files(), 150);
        assert_eq!(parsed.kbytes(), 2000);
        assert!(!parsed.is_ultrapeer());
        assert!(!parsed.has_ultrapeer_marking());
    }

    #[test]
    fn ultrapeer_pong_rounds_and_advertises_slots() {
        let pong =
            PingReply::new_ultrapeer(Guid::new(), 3, addr(), 150, 1000, 12, 3).with_daily_uptime(86400);
        assert_eq!(pong.kbytes(), 1024);

        let mut payload = Vec::new();
        pong.write_payload(&mut payload);
        let Message::Pong(parsed) = decode(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert!(parsed.is_ultrapeer());
        assert!(parsed.has_ultrapeer_marking());
        assert_eq!(parsed.free_slots(), Some((12, 3)));
        assert_eq!(parsed.daily_uptime(), Some(86400));
    }

    #[test]
    fn host_cache_name_overrides_body_address() {
        let pong = PingReply::new(Guid::new(), 1, addr(), 0, 0)
            .with_udp_host_cache("cache.example.com");
        let mut payload = Vec::new();
        pong.write_payload(&mut payload);
        let Message::Pong(parsed) = decode(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(parsed.advertised_host(), "cache.example.com");
    }

    #[test]
    fn external_address_echo_roundtrip() {
        let seen = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 9), 31337);
        let pong = PingReply::new(Guid::new(), 1, addr(), 0, 0).with_external_address(seen);
        let mut payload = Vec::new();
        pong.write_payload(&mut payload);
        let Message::Pong(parsed) = decode(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(parsed.external_address(), Some(seen));
        // The body address is untouched by the echo.
        assert_eq!(parsed.socket_addr(), addr());
    }

    #[test]
    fn packed_hosts_roundtrip() {
        let hosts = vec![
            SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6346),
            SocketAddrV4::new(Ipv4Addr::new(5, 6, 7, 8), 12345),
        ];
        let pong = PingReply::new(Guid::new(), 1, addr(), 0, 0).with_packed_hosts(&hosts);
        let mut payload = Vec::new();
        pong.write_payload(&mut payload);
        let Message::Pong(parsed) = decode(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(parsed.packed_hosts(), hosts);
    }

    #[test]
    fn rejects_short_payload() {
        assert_eq!(
            decode(&[0u8; 10]).unwrap_err(),
            BadPacketError::PayloadTooSmall(10)
        );
    }

    #[test]
    fn rejects_zero_port() {
        let mut payload = Vec::new();
        PingReply::new(Guid::new(), 1, addr(), 0, 0).write_payload(&mut payload);
        payload[0] = 0;
        payload[1] = 0;
        assert_eq!(decode(&payload).unwrap_err(), BadPacketError::InvalidPort(0));
    }

    #[test]
    fn rejects_unspecified_address() {
        let bad = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 6346);
        let mut payload = Vec::new();
        PingReply::new(Guid::new(), 1, bad, 0, 0).write_payload(&mut payload);
        assert!(matches!(
            decode(&payload).unwrap_err(),
            BadPacketError::InvalidAddress(_)
        ));
    }

    #[test]
    fn malformed_extensions_degrade_to_plain_pong() {
        let mut payload = Vec::new();
        PingReply::new(Guid::new(), 1, addr(), 5, 9).write_payload(&mut payload);
        payload.extend_from_slice(&[0xC3, 0x80]); // truncated block
        let Message::Pong(parsed) = decode(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert!(parsed.ggep().is_empty());
        assert_eq!(parsed.files(), 5);
    }
}
