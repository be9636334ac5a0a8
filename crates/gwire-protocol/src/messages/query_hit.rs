//! Query hits: bundles of search results routed back toward the querier.
//!
//! The payload opens with a result count, the responder's address and
//! speed, then one record per result: index, size, a NUL-terminated name,
//! and a second NUL-terminated area holding URNs. After the records most
//! clients append a QHD (query hit descriptor): a 4-byte vendor code, a
//! pair of control/flags bytes, the XML metadata size, a private flags
//! byte, a GGEP block, and the XML itself. The last 16 bytes of every hit
//! are the responder's client GUID, the address pushes are sent to.
//!
//! Hits travel through untrusted relays, so decoding is deliberately
//! forgiving: a corrupt record area yields a hit with no result list (still
//! routable by GUID), and a corrupt QHD yields a hit with unknown flags.

use std::net::{Ipv4Addr, SocketAddrV4};

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use gwire_core::config::Config;
use gwire_core::constants::{EXTENSION_SEPARATOR, GUID_SIZE, XML_MAX_SIZE};
use gwire_core::error::BadPacketError;

use crate::ggep::{keys, GgepBlock};
use crate::guid::Guid;
use crate::header::{MessageHeader, MessageType};
use crate::huge::HugeExtension;
use crate::messages::{Message, MessageCodec};
use crate::urn::Urn;

/// Push bit. Its companion is reversed: the flags byte says whether the
/// bit is meaningful and the control byte carries the value, the opposite
/// of every other flag.
const FLAG_PUSH: u8 = 0x01;
/// All upload slots taken.
const FLAG_BUSY: u8 = 0x04;
/// The responder has completed at least one upload.
const FLAG_UPLOADED: u8 = 0x08;
/// The speed field is measured, not user-configured.
const FLAG_MEASURED_SPEED: u8 = 0x10;
/// A GGEP block is present in the QHD.
const FLAG_GGEP: u8 = 0x20;

/// Chat bit in the QHD private area.
const PRIVATE_CHAT: u8 = 0x01;

/// Offset of the first result record: count, port, address, speed.
const RECORDS_OFFSET: usize = 11;

/// One shared file matching the query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    index: u32,
    size: u32,
    name: String,
    urns: Vec<Urn>,
}

impl Response {
    /// A result record for the file at `index` in the responder's library.
    pub fn new(index: u32, size: u32, name: &str) -> Self {
        Response { index, size, name: name.to_owned(), urns: Vec::new() }
    }

    /// Attaches a URN to the record.
    pub fn with_urn(mut self, urn: Urn) -> Self {
        self.urns.push(urn);
        self
    }

    /// The file's index in the responder's library.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The file size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// URNs identifying the file's content.
    pub fn urns(&self) -> &[Urn] {
        &self.urns
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.index.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        for (i, urn) in self.urns.iter().enumerate() {
            if i > 0 {
                out.push(EXTENSION_SEPARATOR);
            }
            out.extend_from_slice(urn.to_string().as_bytes());
        }
        out.push(0);
    }

    /// Parses one record at `pos`; `None` means the area is corrupt and the
    /// whole result list must be discarded.
    fn parse(buf: &[u8], pos: usize) -> Option<(Response, usize)> {
        let fixed = buf.get(pos..pos + 8)?;
        let index = LittleEndian::read_u32(&fixed[0..4]);
        let size = LittleEndian::read_u32(&fixed[4..8]);

        let name_start = pos + 8;
        let name_end = name_start + buf[name_start..].iter().position(|&b| b == 0)?;
        let name = std::str::from_utf8(&buf[name_start..name_end]).ok()?;

        let ext_start = name_end + 1;
        let ext_end = ext_start + buf[ext_start..].iter().position(|&b| b == 0)?;
        let ext = HugeExtension::parse(&buf[ext_start..ext_end]);

        let response = Response {
            index,
            size,
            name: name.to_owned(),
            urns: ext.urns().to_vec(),
        };
        Some((response, ext_end + 1))
    }
}

/// A bundle of search results.
#[derive(Clone, Debug)]
pub struct QueryReply {
    header: MessageHeader,
    port: u16,
    addr: Ipv4Addr,
    speed: u32,
    results: Option<Vec<Response>>,
    vendor: Option<String>,
    push_needed: Option<bool>,
    busy: Option<bool>,
    uploaded: Option<bool>,
    measured_speed: Option<bool>,
    supports_chat: bool,
    xml: Option<Vec<u8>>,
    ggep: GgepBlock,
    client_guid: Guid,
}

impl QueryReply {
    /// A hit answering the query with GUID `query_guid`. `vendor` is the
    /// responder's 4-character vendor code.
    pub fn new(
        query_guid: Guid,
        ttl: u8,
        addr: SocketAddrV4,
        speed: u32,
        results: Vec<Response>,
        vendor: &str,
        client_guid: Guid,
    ) -> Self {
        assert!(results.len() <= u8::MAX as usize, "too many results for one hit");
        assert_eq!(vendor.len(), 4, "vendor code must be 4 characters");
        QueryReply {
            header: MessageHeader::new(query_guid, MessageType::QueryReply, ttl),
            port: addr.port(),
            addr: *addr.ip(),
            speed,
            results: Some(results),
            vendor: Some(vendor.to_owned()),
            push_needed: None,
            busy: None,
            uploaded: None,
            measured_speed: None,
            supports_chat: false,
            xml: None,
            ggep: GgepBlock::new(),
            client_guid,
        }
    }

    /// States whether a push is needed to reach the responder.
    pub fn mark_push_needed(mut self, needed: bool) -> Self {
        self.push_needed = Some(needed);
        self
    }

    /// States whether all upload slots are taken.
    pub fn mark_busy(mut self, busy: bool) -> Self {
        self.busy = Some(busy);
        self
    }

    /// States whether the responder has completed an upload before.
    pub fn mark_uploaded(mut self, uploaded: bool) -> Self {
        self.uploaded = Some(uploaded);
        self
    }

    /// States whether the speed field was measured rather than configured.
    pub fn mark_measured_speed(mut self, measured: bool) -> Self {
        self.measured_speed = Some(measured);
        self
    }

    /// Advertises chat support.
    pub fn with_chat(mut self) -> Self {
        self.supports_chat = true;
        self
    }

    /// Advertises browse-host support.
    pub fn with_browse_host(mut self) -> Self {
        self.ggep.put_flag(keys::BROWSE_HOST);
        self
    }

    /// Marks this hit as answering a multicast query.
    pub fn with_multicast(mut self) -> Self {
        self.ggep.put_flag(keys::MULTICAST_RESPONSE);
        self
    }

    /// Advertises firewall-to-firewall transfer support.
    pub fn with_fw_transfer(mut self, version: u8) -> Self {
        self.ggep.put(keys::FW_TRANS, &[version]);
        self
    }

    /// Attaches push proxy addresses.
    pub fn with_push_proxies(mut self, proxies: &[SocketAddrV4]) -> Self {
        let mut packed = Vec::with_capacity(proxies.len() * 6);
        for proxy in proxies {
            packed.extend_from_slice(&proxy.ip().octets());
            packed.extend_from_slice(&proxy.port().to_le_bytes());
        }
        self.ggep.put(keys::PUSH_PROXIES, &packed);
        self
    }

    /// Attaches XML metadata for the whole result set.
    pub fn with_xml(mut self, xml: &[u8]) -> Self {
        assert!(xml.len() < XML_MAX_SIZE, "xml metadata too large");
        self.xml = Some(xml.to_vec());
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

    /// The responder's IPv4 address.
    pub fn address(&self) -> Ipv4Addr {
        self.addr
    }

    /// The responder's address and port together.
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr, self.port)
    }

    /// The responder's speed in kilobits per second.
    pub fn speed(&self) -> u32 {
        self.speed
    }

    /// The result records, or `None` when the record area was corrupt.
    /// A hit with `None` is still routable by its GUIDs.
    pub fn results(&self) -> Option<&[Response]> {
        self.results.as_deref()
    }

    /// The responder's vendor code, when a QHD was present.
    pub fn vendor(&self) -> Option<&str> {
        self.vendor.as_deref()
    }

    /// Whether a push is needed; `None` when the responder did not say.
    pub fn push_needed(&self) -> Option<bool> {
        self.push_needed
    }

    /// Whether all upload slots are taken; `None` when not stated.
    pub fn busy(&self) -> Option<bool> {
        self.busy
    }

    /// Whether the responder ever completed an upload; `None` when not
    /// stated.
    pub fn uploaded(&self) -> Option<bool> {
        self.uploaded
    }

    /// Whether the speed was measured; `None` when not stated.
    pub fn measured_speed(&self) -> Option<bool> {
        self.measured_speed
    }

    /// True when the responder supports chat.
    pub fn supports_chat(&self) -> bool {
        self.supports_chat
    }

    /// True when the responder supports browse-host.
    pub fn supports_browse_host(&self) -> bool {
        self.ggep.contains(keys::BROWSE_HOST)
    }

    /// True when this hit answers a multicast query.
    pub fn is_multicast(&self) -> bool {
        self.ggep.contains(keys::MULTICAST_RESPONSE)
    }

    /// Firewall-to-firewall transfer version, when advertised.
    pub fn fw_transfer_version(&self) -> Option<u8> {
        self.ggep.get(keys::FW_TRANS).and_then(|v| v.first()).copied()
    }

    /// Push proxy addresses, when advertised.
    pub fn push_proxies(&self) -> Vec<SocketAddrV4> {
        let Some(packed) = self.ggep.get(keys::PUSH_PROXIES) else {
            return Vec::new();
        };
        packed
            .chunks_exact(6)
            .map(|c| {
                let ip = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
                SocketAddrV4::new(ip, LittleEndian::read_u16(&c[4..6]))
            })
            .collect()
    }

    /// The XML metadata bytes, if any.
    pub fn xml(&self) -> Option<&[u8]> {
        self.xml.as_deref()
    }

    /// The QHD extension block.
    pub fn ggep(&self) -> &GgepBlock {
        &self.ggep
    }

    /// The responder's client GUID, where pushes are addressed.
    pub fn client_guid(&self) -> Guid {
        self.client_guid
    }

    /// Appends the payload: fixed prefix, records, QHD, client GUID.
    pub fn write_payload(&self, out: &mut Vec<u8>) {
        let results = self.results.as_deref().unwrap_or_default();
        out.push(results.len() as u8);
        out.extend_from_slice(&self.port.to_le_bytes());
        out.extend_from_slice(&self.addr.octets());
        out.extend_from_slice(&self.speed.to_le_bytes());
        for response in results {
            response.write(out);
        }

        if let Some(vendor) = &self.vendor {
            let mut control = 0u8;
            let mut flags = 0u8;
            if let Some(push) = self.push_needed {
                flags |= FLAG_PUSH;
                if push {
                    control |= FLAG_PUSH;
                }
            }
            for (bit, value) in [
                (FLAG_BUSY, self.busy),
                (FLAG_UPLOADED, self.uploaded),
                (FLAG_MEASURED_SPEED, self.measured_speed),
            ] {
                if let Some(v) = value {
                    control |= bit;
                    if v {
                        flags |= bit;
                    }
                }
            }
            if !self.ggep.is_empty() {
                control |= FLAG_GGEP;
                flags |= FLAG_GGEP;
            }

            let xml = self.xml.as_deref().unwrap_or_default();
            out.extend_from_slice(vendor.as_bytes());
            out.push(4); // common area: control, flags, xml size
            out.push(control);
            out.push(flags);
            out.extend_from_slice(&((xml.len() as u16) + 1).to_le_bytes());
            out.push(if self.supports_chat { PRIVATE_CHAT } else { 0 });
            self.ggep.write(out);
            out.extend_from_slice(xml);
            out.push(0);
        }

        out.extend_from_slice(self.client_guid.as_bytes());
    }
}

/// Parses `count` records; `None` on any desync.
fn parse_records(buf: &[u8], count: usize) -> Option<(Vec<Response>, usize)> {
    let mut results = Vec::with_capacity(count);
    let mut pos = 0;
    for _ in 0..count {
        let (response, next) = Response::parse(buf, pos)?;
        results.push(response);
        pos = next;
    }
    Some((results, pos))
}

/// The QHD fields, parsed best effort.
#[derive(Default)]
struct Qhd {
    vendor: Option<String>,
    push_needed: Option<bool>,
    busy: Option<bool>,
    uploaded: Option<bool>,
    measured_speed: Option<bool>,
    supports_chat: bool,
    xml: Option<Vec<u8>>,
    ggep: GgepBlock,
}

fn parse_qhd(area: &[u8]) -> Qhd {
    let mut qhd = Qhd::default();
    if area.len() < 5 {
        return qhd;
    }
    let Ok(vendor) = std::str::from_utf8(&area[..4]) else {
        return qhd;
    };
    let common_len = area[4] as usize;
    let Some(common) = area.get(5..5 + common_len) else {
        return qhd;
    };
    qhd.vendor = Some(vendor.to_owned());

    let control = common.first().copied().unwrap_or(0);
    let flags = common.get(1).copied().unwrap_or(0);
    // Push companion is reversed relative to the rest.
    if flags & FLAG_PUSH != 0 {
        qhd.push_needed = Some(control & FLAG_PUSH != 0);
    }
    if control & FLAG_BUSY != 0 {
        qhd.busy = Some(flags & FLAG_BUSY != 0);
    }
    if control & FLAG_UPLOADED != 0 {
        qhd.uploaded = Some(flags & FLAG_UPLOADED != 0);
    }
    if control & FLAG_MEASURED_SPEED != 0 {
        qhd.measured_speed = Some(flags & FLAG_MEASURED_SPEED != 0);
    }

    let mut pos = 5 + common_len;
    if let Some(&private) = area.get(pos) {
        qhd.supports_chat = private & PRIVATE_CHAT != 0;
        pos += 1;
    }

    if control & FLAG_GGEP != 0 && flags & FLAG_GGEP != 0 {
        match GgepBlock::parse(area, pos) {
            Ok((block, _)) => qhd.ggep = block,
            Err(err) => debug!(%err, "ignoring malformed hit extensions"),
        }
    }

    if common_len >= 4 {
        let xml_size = LittleEndian::read_u16(&common[2..4]) as usize;
        if xml_size > 1 && xml_size <= XML_MAX_SIZE {
            // The XML is the last xml_size - 1 bytes before the closing NUL.
            if area.len() >= xml_size && area.len() - xml_size >= pos {
                let start = area.len() - xml_size;
                qhd.xml = Some(area[start..area.len() - 1].to_vec());
            }
        }
    }

    qhd
}

/// Decodes query hit payloads.
pub struct QueryHitCodec;

impl MessageCodec for QueryHitCodec {
    fn decode(
        &self,
        header: MessageHeader,
        payload: &[u8],
        _config: &Config,
    ) -> Result<Message, BadPacketError> {
        if payload.len() < RECORDS_OFFSET + GUID_SIZE {
            return Err(BadPacketError::PayloadTooSmall(payload.len()));
        }
        let count = payload[0] as usize;
        let port = LittleEndian::read_u16(&payload[1..3]);
        let addr = Ipv4Addr::new(payload[3], payload[4], payload[5], payload[6]);
        let speed = LittleEndian::read_u32(&payload[7..11]);

        let mut guid = [0u8; GUID_SIZE];
        guid.copy_from_slice(&payload[payload.len() - GUID_SIZE..]);
        let client_guid = Guid::from_bytes(guid);

        let middle = &payload[RECORDS_OFFSET..payload.len() - GUID_SIZE];
        let (results, qhd) = match parse_records(middle, count) {
            Some((records, used)) => (Some(records), parse_qhd(&middle[used..])),
            None => {
                // The QHD cannot be located without the record boundaries.
                debug!(count, "discarding corrupt result records");
                (None, Qhd::default())
            }
        };

        Ok(Message::QueryHit(QueryReply {
            header,
            port,
            addr,
            speed,
            results,
            vendor: qhd.vendor,
            push_needed: qhd.push_needed,
            busy: qhd.busy,
            uploaded: qhd.uploaded,
            measured_speed: qhd.measured_speed,
            supports_chat: qhd.supports_chat,
            xml: qhd.xml,
            ggep: qhd.ggep,
            client_guid,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA1: &str = "urn:sha1:PLSTHIPQGSSZTS5FJUPAKUZWUGYQYPFB";

    fn addr() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 6346)
    }

    fn decode(payload: &[u8]) -> QueryReply {
        let header = MessageHeader::new(Guid::new(), MessageType::QueryReply, 3);
        match QueryHitCodec
            .decode(header, payload, &Config::default())
            .unwrap()
        {
            Message::QueryHit(hit) => hit,
            _ => panic!("wrong variant"),
        }
    }

    fn sample_results() -> Vec<Response> {
        vec![
            Response::new(3, 4096, "song.mp3").with_urn(SHA1.parse().unwrap()),
            Response::new(7, 123_456, "album cover.png"),
        ]
    }

    #[test]
    fn roundtrip_full_hit() {
        let client = Guid::new();
        let proxies = vec![SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 9000)];
        let hit = QueryReply::new(Guid::new(), 3, addr(), 350, sample_results(), "LIME", client)
            .mark_push_needed(true)
            .mark_busy(false)
            .mark_measured_speed(true)
            .with_chat()
            .with_browse_host()
            .with_fw_transfer(1)
            .with_push_proxies(&proxies)
            .with_xml(b"<?xml version=\"1.0\"?><audios/>");

        let mut payload = Vec::new();
        hit.write_payload(&mut payload);
        let parsed = decode(&payload);

        assert_eq!(parsed.socket_addr(), addr());
        assert_eq!(parsed.speed(), 350);
        assert_eq!(parsed.client_guid(), client);
        let results = parsed.results().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name(), "song.mp3");
        assert_eq!(results[0].urns()[0].to_string(), SHA1);
        assert_eq!(results[1].index(), 7);
        assert!(results[1].urns().is_empty());

        assert_eq!(parsed.vendor(), Some("LIME"));
        assert_eq!(parsed.push_needed(), Some(true));
        assert_eq!(parsed.busy(), Some(false));
        assert_eq!(parsed.uploaded(), None);
        assert_eq!(parsed.measured_speed(), Some(true));
        assert!(parsed.supports_chat());
        assert!(parsed.supports_browse_host());
        assert_eq!(parsed.fw_transfer_version(), Some(1));
        assert_eq!(parsed.push_proxies(), proxies);
        assert_eq!(parsed.xml(), Some(&b"<?xml version=\"1.0\"?><audios/>"[..]));
    }

    #[test]
    fn unstated_flags_stay_unknown() {
        let hit = QueryReply::new(
            Guid::new(),
            1,
            addr(),
            0,
            sample_results(),
            "BEAR",
            Guid::new(),
        );
        let mut payload = Vec::new();
        hit.write_payload(&mut payload);
        let parsed = decode(&payload);
        assert_eq!(parsed.push_needed(), None);
        assert_eq!(parsed.busy(), None);
        assert_eq!(parsed.uploaded(), None);
        assert_eq!(parsed.measured_speed(), None);
        assert!(!parsed.supports_chat());
    }

    #[test]
    fn count_desync_discards_results_not_message() {
        let client = Guid::new();
        let hit = QueryReply::new(Guid::new(), 1, addr(), 99, sample_results(), "LIME", client);
        let mut payload = Vec::new();
        hit.write_payload(&mut payload);
        payload[0] = 5; // claim more records than exist

        let parsed = decode(&payload);
        assert!(parsed.results().is_none());
        assert_eq!(parsed.socket_addr(), addr());
        assert_eq!(parsed.speed(), 99);
        assert_eq!(parsed.client_guid(), client);
    }

    #[test]
    fn empty_result_list_is_distinct_from_corrupt() {
        let hit = QueryReply::new(Guid::new(), 1, addr(), 0, Vec::new(), "LIME", Guid::new());
        let mut payload = Vec::new();
        hit.write_payload(&mut payload);
        let parsed = decode(&payload);
        assert_eq!(parsed.results(), Some(&[][..]));
    }

    #[test]
    fn hit_without_qhd_has_no_vendor() {
        // Count 0, fixed prefix, then just the client GUID.
        let mut payload = vec![0u8];
        payload.extend_from_slice(&6346u16.to_le_bytes());
        payload.extend_from_slice(&[10, 0, 0, 7]);
        payload.extend_from_slice(&350u32.to_le_bytes());
        payload.extend_from_slice(Guid::new().as_bytes());

        let parsed = decode(&payload);
        assert_eq!(parsed.vendor(), None);
        assert_eq!(parsed.results(), Some(&[][..]));
        assert_eq!(parsed.push_needed(), None);
    }

    #[test]
    fn rejects_short_payload() {
        let header = MessageHeader::new(Guid::new(), MessageType::QueryReply, 1);
        let err = QueryHitCodec
            .decode(header, &[0u8; 20], &Config::default())
            .unwrap_err();
        assert_eq!(err, BadPacketError::PayloadTooSmall(20));
    }

    #[test]
    fn multicast_marking_roundtrips() {
        let hit = QueryReply::new(Guid::new(), 1, addr(), 0, sample_results(), "LIME", Guid::new())
            .with_multicast();
        let mut payload = Vec::new();
        hit.write_payload(&mut payload);
        assert!(decode(&payload).is_multicast());
    }
}
