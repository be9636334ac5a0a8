//! End-to-end exercises of the wire format: build, serialize, and read
//! messages back through the factory the way a connection loop would.

use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddrV4};

use gwire_core::config::Config;
use gwire_core::constants::FW_TRANS_INDEX;
use gwire_core::error::{BadPacketError, ReadError};
use gwire_protocol::ggep::{cobs, keys, GgepBlock};
use gwire_protocol::guid::Guid;
use gwire_protocol::header::{MessageHeader, MessageType, Network};
use gwire_protocol::messages::vendor::{
    VendorCapability, VendorMessage, SELECTOR_MESSAGES_SUPPORTED, VENDOR_BEAR, VENDOR_LIME,
};
use gwire_protocol::messages::{
    Message, PingReply, PingRequest, PushRequest, QueryReply, QueryRequest, Response,
};
use gwire_protocol::MessageFactory;

const SHA1: &str = "urn:sha1:PLSTHIPQGSSZTS5FJUPAKUZWUGYQYPFB";

fn factory() -> MessageFactory {
    MessageFactory::with_defaults(Config::default())
}

fn addr() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(10, 20, 30, 40), 6346)
}

fn read_one(factory: &MessageFactory, wire: Vec<u8>) -> Result<Message, ReadError> {
    let mut cursor = Cursor::new(wire);
    factory
        .read(&mut cursor, Network::Tcp)
        .map(|msg| msg.expect("one message"))
}

#[test]
fn ggep_roundtrip_compressed_and_plain() {
    let mut block = GgepBlock::new();
    block.put_str(keys::VENDOR_INFO, "GWIR");
    block.put_u32(keys::CREATE_TIME, 1_234_567_890);
    block.put_flag(keys::BROWSE_HOST);
    block.put(keys::ALTS, &[1, 2, 3, 4, 0xCA, 0x18]);
    block.put_compressed(keys::PACKED_HOST_CACHES, "cache.one\ncache.two\n".repeat(20).as_bytes());

    let bytes = block.to_bytes();
    let (parsed, end) = GgepBlock::parse(&bytes, 0).unwrap();
    assert_eq!(end, bytes.len());
    assert_eq!(parsed, block);
}

#[test]
fn cobs_restores_originals_and_never_restuffs_clean_values() {
    let with_nulls = [0u8, 7, 0, 0, 9];
    assert_eq!(cobs::decode(&cobs::encode(&with_nulls)).unwrap(), with_nulls);

    // A zero-free value costs exactly one extra byte and keeps its bytes.
    let clean = b"no nulls here";
    let encoded = cobs::encode(clean);
    assert_eq!(encoded.len(), clean.len() + 1);
    assert_eq!(&encoded[1..], clean);
}

#[test]
fn hop_decrements_ttl_and_reports_prior_value() {
    let header = MessageHeader::new(Guid::new(), MessageType::Query, 7).with_hops(2);
    let (hopped, prior) = header.hop();
    assert_eq!(prior, 7);
    assert_eq!(hopped.ttl(), 6);
    assert_eq!(hopped.hops(), 3);

    let spent = header.with_ttl(0);
    let (hopped, prior) = spent.hop();
    assert_eq!(prior, 0);
    assert_eq!(hopped.ttl(), 0);
}

#[test]
fn hard_max_rejects_search_request_the_clamp_cannot_save() {
    let config = Config { soft_max: 20, ..Config::default() };
    let f = MessageFactory::with_defaults(config);
    let mut wire = f.encode(&Message::Query(QueryRequest::new(1, "song")));
    wire[17] = 9; // ttl
    wire[18] = 6; // hops

    let err = read_one(&f, wire).unwrap_err();
    assert!(matches!(
        err,
        ReadError::Packet(BadPacketError::OverHardMax { ttl: 9, hops: 6 })
    ));
}

#[test]
fn soft_max_clamps_search_request_ttl() {
    let config = Config { soft_max: 7, ..Config::default() };
    let f = MessageFactory::with_defaults(config);
    let mut wire = f.encode(&Message::Query(QueryRequest::new(1, "song")));
    wire[17] = 10;
    wire[18] = 5;

    let msg = read_one(&f, wire).unwrap();
    assert_eq!(msg.header().ttl(), 2);
    assert_eq!(msg.header().hops(), 5);
}

#[test]
fn query_hit_count_desync_yields_no_result_list() {
    let f = factory();
    let results = vec![
        Response::new(1, 100, "a.mp3").with_urn(SHA1.parse().unwrap()),
        Response::new(2, 200, "b.mp3"),
    ];
    let hit = QueryReply::new(Guid::new(), 2, addr(), 56, results, "GWIR", Guid::new());
    let mut wire = f.encode(&Message::QueryHit(hit));

    // Claim 3 records where only 2 exist.
    wire[23] = 3;
    let Message::QueryHit(parsed) = read_one(&f, wire).unwrap() else {
        panic!("wrong variant");
    };
    assert!(parsed.results().is_none());
    assert_eq!(parsed.socket_addr(), addr());
}

#[test]
fn push_sentinel_and_port_validation() {
    let f = factory();
    let push = PushRequest::new_fw_transfer(3, Guid::new(), addr());
    let wire = f.encode(&Message::Push(push));
    let Message::Push(parsed) = read_one(&f, wire).unwrap() else {
        panic!("wrong variant");
    };
    assert!(parsed.is_fw_transfer());
    assert_eq!(parsed.index(), FW_TRANS_INDEX);

    let mut wire = f.encode(&Message::Push(PushRequest::new(3, Guid::new(), 9, addr())));
    let len = wire.len();
    wire[len - 2] = 0;
    wire[len - 1] = 0;
    let err = read_one(&f, wire).unwrap_err();
    assert!(matches!(
        err,
        ReadError::Packet(BadPacketError::InvalidPort(0))
    ));
}

#[test]
fn vendor_dispatch_and_opaque_fallback() {
    let f = factory();
    let caps = vec![VendorCapability { vendor: VENDOR_BEAR, selector: 4, version: 1 }];
    let wire = f.encode(&Message::Vendor(VendorMessage::messages_supported(caps.clone())));
    let Message::Vendor(parsed) = read_one(&f, wire).unwrap() else {
        panic!("wrong variant");
    };
    assert_eq!(parsed.vendor(), VENDOR_LIME);
    assert_eq!(parsed.selector(), SELECTOR_MESSAGES_SUPPORTED);
    match parsed.payload() {
        gwire_protocol::messages::VendorPayload::MessagesSupported(got) => {
            assert_eq!(got, &caps);
        }
        other => panic!("decoded through wrong sub-codec: {other:?}"),
    }

    let opaque = VendorMessage::opaque(*b"RAZA", 99, 1, vec![0xDE, 0xAD]);
    let wire = f.encode(&Message::Vendor(opaque));
    let Message::Vendor(parsed) = read_one(&f, wire.clone()).unwrap() else {
        panic!("wrong variant");
    };
    assert_eq!(f.encode(&Message::Vendor(parsed)), wire);
}

#[test]
fn every_kind_roundtrips_through_the_factory() {
    let f = factory();
    let messages = vec![
        Message::Ping(PingRequest::with_cached_pong_request(3, true)),
        Message::Pong(
            PingReply::new_ultrapeer(Guid::new(), 3, addr(), 1000, 5000, 10, 2)
                .with_daily_uptime(7200)
                .with_extensions(f.pong_template()),
        ),
        Message::Query(
            QueryRequest::new(4, "blue album")
                .mark_out_of_band()
                .with_rich_query("<?xml version=\"1.0\"?><audios/>"),
        ),
        Message::QueryHit(
            QueryReply::new(
                Guid::new(),
                2,
                addr(),
                350,
                vec![Response::new(0, 42, "blue.mp3").with_urn(SHA1.parse().unwrap())],
                "GWIR",
                Guid::new(),
            )
            .mark_push_needed(false)
            .mark_busy(true)
            .with_browse_host(),
        ),
        Message::Push(PushRequest::new(5, Guid::new(), 17, addr())),
        Message::Vendor(VendorMessage::hops_flow(4)),
    ];

    for original in messages {
        let wire = f.encode(&original);
        let parsed = read_one(&f, wire).unwrap();
        assert_eq!(parsed.kind(), original.kind());
        assert_eq!(parsed.header().guid(), original.header().guid());
    }
}

#[test]
fn a_connection_stream_survives_one_bad_message() {
    let f = factory();
    let mut wire = Vec::new();

    // Good ping, then a pong with a zero port, then another good ping.
    wire.extend_from_slice(&f.encode(&Message::Ping(PingRequest::new(1))));
    let pong = PingReply::new(Guid::new(), 1, addr(), 1, 1);
    let mut bad = f.encode(&Message::Pong(pong));
    bad[23] = 0;
    bad[24] = 0;
    wire.extend_from_slice(&bad);
    wire.extend_from_slice(&f.encode(&Message::Ping(PingRequest::new(1))));

    let mut cursor = Cursor::new(wire);
    assert!(matches!(
        f.read(&mut cursor, Network::Tcp).unwrap(),
        Some(Message::Ping(_))
    ));
    let err = f.read(&mut cursor, Network::Tcp).unwrap_err();
    assert!(!err.is_fatal());
    assert!(matches!(
        f.read(&mut cursor, Network::Tcp).unwrap(),
        Some(Message::Ping(_))
    ));
}

#[test]
fn udp_arrival_is_tagged_on_the_header() {
    let f = factory();
    let wire = f.encode(&Message::Ping(PingRequest::with_address_request()));
    let mut cursor = Cursor::new(wire);
    let msg = f.read(&mut cursor, Network::Udp).unwrap().unwrap();
    assert_eq!(msg.header().network(), Network::Udp);
}
