//! Search requests.
//!
//! The payload is a 16-bit min-speed word, a NUL-terminated keyword string,
//! and an optional extension run (URNs, an XML rich query, GGEP) closed by
//! a second NUL. The min-speed field was repurposed long ago: when its
//! flags-valid bit is set the remaining bits are capability flags, not a
//! speed.

use byteorder::{ByteOrder, LittleEndian};

use gwire_core::config::Config;
use gwire_core::constants::{EXTENSION_SEPARATOR, MAX_QUERY_LENGTH, MAX_XML_QUERY_LENGTH};
use gwire_core::error::BadPacketError;

use crate::ggep::{keys, GgepBlock};
use crate::guid::Guid;
use crate::header::{MessageHeader, MessageType};
use crate::huge::HugeExtension;
use crate::messages::{Message, MessageCodec};
use crate::urn::{Urn, UrnType};

/// Min-speed bit meaning "the rest of this word is flags".
const FLAGS_VALID: u16 = 0x0080;
/// The sender cannot accept incoming connections.
const FIREWALLED: u16 = 0x0040;
/// The sender understands XML metadata in hits.
const WANTS_XML: u16 = 0x0020;
/// Hits may be delivered out of band over UDP.
const OUT_OF_BAND: u16 = 0x0004;
/// The sender can do firewall-to-firewall transfers.
const FW_TRANSFER: u16 = 0x0002;

/// The What's New feature selector carried in `WH`.
pub const FEATURE_WHATS_NEW: u32 = 1;

/// A keyword and URN search request.
#[derive(Clone, Debug)]
pub struct QueryRequest {
    header: MessageHeader,
    min_speed: u16,
    query: String,
    rich_query: Option<String>,
    urns: Vec<Urn>,
    urn_types: Vec<UrnType>,
    ggep: GgepBlock,
}

impl QueryRequest {
    /// A keyword query with the modern default flags: flags-valid and
    /// XML-capable.
    pub fn new(ttl: u8, query: &str) -> Self {
        QueryRequest {
            header: MessageHeader::new(Guid::new(), MessageType::Query, ttl),
            min_speed: FLAGS_VALID | WANTS_XML,
            query: query.to_owned(),
            rich_query: None,
            urns: Vec::new(),
            urn_types: Vec::new(),
            ggep: GgepBlock::new(),
        }
    }

    /// A query for a specific file by URN. The keyword part carries the
    /// legacy placeholder so old relays still forward it.
    pub fn for_urn(ttl: u8, urn: Urn) -> Self {
        let mut query = QueryRequest::new(ttl, "\\");
        query.urns.push(urn);
        query
    }

    /// A What's New query: asks ultrapeers for their three newest files.
    pub fn whats_new(ttl: u8) -> Self {
        let mut query = QueryRequest::new(ttl, "WhatIsNewXOXO");
        query.ggep.put_u32(keys::FEATURE_QUERY, FEATURE_WHATS_NEW);
        query
    }

    /// Adds an XML rich query.
    pub fn with_rich_query(mut self, xml: &str) -> Self {
        self.rich_query = Some(xml.to_owned());
        self
    }

    /// Asks responders to include URNs of the given kind, or of any kind,
    /// in their hits.
    pub fn with_urn_type(mut self, tag: UrnType) -> Self {
        self.urn_types.push(tag);
        self
    }

    /// Marks the sender as firewalled.
    pub fn mark_firewalled(mut self) -> Self {
        self.min_speed |= FIREWALLED;
        self
    }

    /// Requests out-of-band hit delivery.
    pub fn mark_out_of_band(mut self) -> Self {
        self.min_speed |= OUT_OF_BAND;
        self
    }

    /// Advertises firewall-to-firewall transfer support.
    pub fn mark_fw_transfer_capable(mut self) -> Self {
        self.min_speed |= FW_TRANSFER;
        self
    }

    /// Forbids ultrapeers from proxying this query on the sender's behalf.
    pub fn mark_do_not_proxy(mut self) -> Self {
        self.ggep.put_flag(keys::NO_PROXY);
        self
    }

    /// Restricts hits to the given media-type mask.
    pub fn with_meta_mask(mut self, mask: u32) -> Self {
        self.ggep.put_u32(keys::META, mask);
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

    /// The keyword string.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The XML rich query, if any.
    pub fn rich_query(&self) -> Option<&str> {
        self.rich_query.as_deref()
    }

    /// URNs the sender is searching for.
    pub fn urns(&self) -> &[Urn] {
        &self.urns
    }

    /// URN request tags asking for URNs in hits.
    pub fn urn_types(&self) -> &[UrnType] {
        &self.urn_types
    }

    /// The extension block.
    pub fn ggep(&self) -> &GgepBlock {
        &self.ggep
    }

    /// True when the min-speed word carries flags rather than a speed.
    pub fn flags_valid(&self) -> bool {
        self.min_speed & FLAGS_VALID != 0
    }

    /// True when the sender declared itself firewalled.
    pub fn is_firewalled(&self) -> bool {
        self.flags_valid() && self.min_speed & FIREWALLED != 0
    }

    /// True when the sender understands XML metadata in hits.
    pub fn wants_xml(&self) -> bool {
        self.flags_valid() && self.min_speed & WANTS_XML != 0
    }

    /// True when hits may be sent out of band over UDP.
    pub fn wants_out_of_band(&self) -> bool {
        self.flags_valid() && self.min_speed & OUT_OF_BAND != 0
    }

    /// True when the sender can do firewall-to-firewall transfers.
    pub fn fw_transfer_capable(&self) -> bool {
        self.flags_valid() && self.min_speed & FW_TRANSFER != 0
    }

    /// The feature selector, when this is a feature query.
    pub fn feature_selector(&self) -> Option<u32> {
        self.ggep.u32_value(keys::FEATURE_QUERY).ok()
    }

    /// True when this is a What's New query.
    pub fn is_whats_new(&self) -> bool {
        self.feature_selector() == Some(FEATURE_WHATS_NEW)
    }

    /// True when ultrapeers must not proxy this query.
    pub fn do_not_proxy(&self) -> bool {
        self.ggep.contains(keys::NO_PROXY)
    }

    /// The media-type mask, when one was given.
    pub fn meta_mask(&self) -> Option<u32> {
        self.ggep.u32_value(keys::META).ok()
    }

    /// Appends the payload bytes: min-speed word, keyword, NUL, extension
    /// run, NUL.
    pub fn write_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.min_speed.to_le_bytes());
        out.extend_from_slice(self.query.as_bytes());
        out.push(0);

        let mut first = true;
        let mut sep = |out: &mut Vec<u8>| {
            if !first {
                out.push(EXTENSION_SEPARATOR);
            }
            first = false;
        };
        for urn in &self.urns {
            sep(out);
            out.extend_from_slice(urn.to_string().as_bytes());
        }
        for tag in &self.urn_types {
            sep(out);
            out.extend_from_slice(tag.prefix().as_bytes());
        }
        if let Some(xml) = &self.rich_query {
            sep(out);
            out.extend_from_slice(xml.as_bytes());
        }
        if !self.ggep.is_empty() {
            sep(out);
            self.ggep.write(out);
        }
        out.push(0);
    }
}

/// Decodes query payloads, enforcing the keyword hygiene rules.
pub struct QueryCodec;

impl MessageCodec for QueryCodec {
    fn decode(
        &self,
        header: MessageHeader,
        payload: &[u8],
        config: &Config,
    ) -> Result<Message, BadPacketError> {
        if payload.len() < 3 {
            return Err(BadPacketError::PayloadTooSmall(payload.len()));
        }
        let min_speed = LittleEndian::read_u16(&payload[0..2]);

        let rest = &payload[2..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(BadPacketError::MalformedText)?;
        let query =
            std::str::from_utf8(&rest[..nul]).map_err(|_| BadPacketError::MalformedText)?;

        let chars = query.chars().count();
        if chars > MAX_QUERY_LENGTH {
            return Err(BadPacketError::QueryTooLarge(chars));
        }
        if let Some(c) = query
            .chars()
            .find(|c| config.illegal_query_chars.contains(c))
        {
            return Err(BadPacketError::IllegalChars(c));
        }

        let ext = HugeExtension::parse(&rest[nul + 1..]);
        if let Some(xml) = ext.rich_query() {
            let xml_chars = xml.chars().count();
            if xml_chars > MAX_XML_QUERY_LENGTH {
                return Err(BadPacketError::XmlTooLarge(xml_chars));
            }
        }
        if query.is_empty() && ext.rich_query().is_none() && ext.urns().is_empty() {
            return Err(BadPacketError::EmptyQuery);
        }

        Ok(Message::Query(QueryRequest {
            header,
            min_speed,
            query: query.to_owned(),
            rich_query: ext.rich_query().map(str::to_owned),
            urns: ext.urns().to_vec(),
            urn_types: ext.urn_types().to_vec(),
            ggep: ext.ggep().clone(),
        }))
    }
}
