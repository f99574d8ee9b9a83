use std::net::Ipv4Addr;

use conntrail_lib::decode::{decode, decode_ethernet, decode_ip, parse_dns, LinkLayer};
use conntrail_lib::packet::{dns, AnswerData, Network, Packet, Transport};
use etherparse::PacketBuilder;
use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::rdata::{A, CNAME};
use hickory_proto::rr::{Name, RData, Record, RecordType};

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const MAC_A: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];
const MAC_B: [u8; 6] = [0x02, 0, 0, 0, 0, 0x02];

fn transport(packet: &Packet) -> &Transport {
    match &packet.network {
        Network::Ipv4 { transport, .. } => transport,
        Network::Other => panic!("expected IPv4 packet"),
    }
}

fn udp_frame(source_port: u16, payload: &[u8]) -> Result<Vec<u8>, String> {
    let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
        .ipv4([10, 0, 0, 1], [10, 0, 0, 5], 64)
        .udp(source_port, 53000);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).map_err(|e| e.to_string())?;
    Ok(frame)
}

fn a_response() -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
    let query = Name::from_ascii("example.com.")?;
    let alias = Name::from_ascii("cdn.example.net.")?;

    let mut message = Message::new();
    message.set_id(0x1234);
    message.set_message_type(MessageType::Response);
    message.add_query(Query::query(query.clone(), RecordType::A));
    message.add_answer(Record::from_rdata(query, 60, RData::CNAME(CNAME(alias.clone()))));
    message.add_answer(Record::from_rdata(alias, 60, RData::A(A(Ipv4Addr::new(93, 184, 216, 34)))));
    Ok(message.to_vec()?)
}

#[test]
fn test_link_layer_from_dlt() {
    assert_eq!(LinkLayer::from_dlt(1).ok(), Some(LinkLayer::Ethernet));
    assert_eq!(LinkLayer::from_dlt(101).ok(), Some(LinkLayer::RawIp));
    assert_eq!(LinkLayer::from_dlt(113).ok(), Some(LinkLayer::LinuxSll));
    assert!(LinkLayer::from_dlt(105).is_err());
}

fn tcp_frame(syn: bool, ack: bool, rst: bool) -> Result<Vec<u8>, String> {
    let mut builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
        .ipv4([10, 0, 0, 5], [93, 184, 216, 34], 64)
        .tcp(40000, 443, 7, 64240);
    if syn {
        builder = builder.syn();
    }
    if ack {
        builder = builder.ack(1);
    }
    if rst {
        builder = builder.rst();
    }
    let mut frame = Vec::with_capacity(builder.size(0));
    builder.write(&mut frame, &[]).map_err(|e| e.to_string())?;
    Ok(frame)
}

#[test]
fn test_decode_tcp_flags() -> TestResult {
    for (syn, ack, rst) in [(true, false, false), (true, true, false), (false, true, false), (false, true, true)] {
        let packet = decode_ethernet(&tcp_frame(syn, ack, rst)?)?;
        let Network::Ipv4 { source, destination, transport } = &packet.network else {
            panic!("expected IPv4");
        };
        assert_eq!(*source, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(*destination, Ipv4Addr::new(93, 184, 216, 34));
        let Transport::Tcp(tcp) = transport else {
            panic!("expected TCP");
        };
        assert_eq!((tcp.source_port, tcp.destination_port), (40000, 443));
        assert_eq!((tcp.syn, tcp.ack, tcp.rst), (syn, ack, rst));
    }
    Ok(())
}

#[test]
fn test_decode_raw_ip() -> TestResult {
    let builder = PacketBuilder::ipv4([10, 0, 0, 5], [10, 0, 0, 9], 64).tcp(50000, 22, 1, 1024).syn();
    let mut bytes = Vec::with_capacity(builder.size(0));
    builder.write(&mut bytes, &[]).map_err(|e| e.to_string())?;

    let packet = decode(LinkLayer::RawIp, &bytes)?;
    assert_eq!(packet, decode_ip(&bytes)?);
    assert!(matches!(transport(&packet), Transport::Tcp(tcp) if tcp.is_syn_only()));
    Ok(())
}

#[test]
fn test_ack_truncated_by_snaplen_still_decodes() -> TestResult {
    let payload = vec![0x17; 1448];
    let builder = PacketBuilder::ethernet2(MAC_B, MAC_A)
        .ipv4([93, 184, 216, 34], [10, 0, 0, 5], 64)
        .tcp(443, 40000, 1, 501)
        .ack(8);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, &payload).map_err(|e| e.to_string())?;
    frame.truncate(1024);

    let packet = decode_ethernet(&frame)?;
    let Network::Ipv4 { source, destination, transport } = &packet.network else {
        panic!("expected IPv4");
    };
    assert_eq!(*source, Ipv4Addr::new(93, 184, 216, 34));
    assert_eq!(*destination, Ipv4Addr::new(10, 0, 0, 5));
    let Transport::Tcp(tcp) = transport else {
        panic!("expected TCP, got {transport:?}");
    };
    assert_eq!((tcp.source_port, tcp.destination_port), (443, 40000));
    assert!(tcp.is_reply());
    assert!(!tcp.rst);
    Ok(())
}

#[test]
fn test_truncated_dns_answer_is_kept_as_udp() -> TestResult {
    let mut frame = udp_frame(dns::PORT, &a_response()?)?;
    frame.truncate(frame.len() - 6);

    let packet = decode_ethernet(&frame)?;
    let Transport::Udp(udp) = transport(&packet) else {
        panic!("expected UDP");
    };
    assert_eq!(udp.source_port, dns::PORT);
    assert!(udp.dns.is_none());
    Ok(())
}

#[test]
fn test_decode_linux_sll() -> TestResult {
    let builder = PacketBuilder::ipv4([10, 0, 0, 5], [10, 0, 0, 9], 64).tcp(50000, 22, 1, 1024).syn();
    let mut ip = Vec::with_capacity(builder.size(0));
    builder.write(&mut ip, &[]).map_err(|e| e.to_string())?;

    // packet type, ARPHRD_ETHER, address length, address, protocol
    let mut frame = vec![0x00, 0x04, 0x00, 0x01, 0x00, 0x06, 2, 0, 0, 0, 0, 1, 0, 0, 0x08, 0x00];
    frame.extend_from_slice(&ip);
    let packet = decode(LinkLayer::LinuxSll, &frame)?;
    assert_eq!(packet, decode_ip(&ip)?);

    frame[14..16].copy_from_slice(&[0x86, 0xdd]);
    assert_eq!(decode(LinkLayer::LinuxSll, &frame)?.network, Network::Other);
    assert!(decode(LinkLayer::LinuxSll, &frame[..10]).is_err());
    Ok(())
}

#[test]
fn test_decode_dns_answer() -> TestResult {
    let frame = udp_frame(dns::PORT, &a_response()?)?;

    let packet = decode_ethernet(&frame)?;
    let Transport::Udp(udp) = transport(&packet) else {
        panic!("expected UDP");
    };
    assert_eq!(udp.source_port, dns::PORT);
    let message = udp.dns.as_ref().ok_or("dns payload not decoded")?;
    assert_eq!(message.response_code, dns::RCODE_NO_ERROR);
    assert_eq!(message.questions.len(), 1);
    assert_eq!(message.questions[0].name, "example.com");
    assert_eq!(message.questions[0].query_type, dns::TYPE_A);
    assert_eq!(message.answers.len(), 2);
    assert_eq!(message.answers[0].name, "example.com");
    assert_eq!(message.answers[0].data, AnswerData::Alias("cdn.example.net".into()));
    assert_eq!(message.answers[1].data, AnswerData::Address(Ipv4Addr::new(93, 184, 216, 34)));
    Ok(())
}

#[test]
fn test_parse_nxdomain() -> TestResult {
    let mut message = Message::new();
    message.set_message_type(MessageType::Response);
    message.set_response_code(ResponseCode::NXDomain);
    message.add_query(Query::query(Name::from_ascii("nope.example.")?, RecordType::A));

    let parsed = parse_dns(&message.to_vec()?).ok_or("nxdomain not decoded")?;
    assert_eq!(parsed.response_code, dns::RCODE_NXDOMAIN);
    assert!(parsed.answers.is_empty());
    assert_eq!(parsed.questions[0].name, "nope.example");
    Ok(())
}

#[test]
fn test_undecodable_dns_payload_kept_as_none() -> TestResult {
    let frame = udp_frame(dns::PORT, &[0xde, 0xad, 0xbe])?;

    let packet = decode_ethernet(&frame)?;
    assert!(matches!(transport(&packet), Transport::Udp(udp) if udp.dns.is_none()));
    Ok(())
}

#[test]
fn test_udp_from_other_ports_is_not_parsed() -> TestResult {
    let frame = udp_frame(5353, &a_response()?)?;

    let packet = decode_ethernet(&frame)?;
    assert!(matches!(transport(&packet), Transport::Udp(udp) if udp.dns.is_none()));
    Ok(())
}

#[test]
fn test_non_ipv4_and_icmp() -> TestResult {
    let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
        .ipv6([0; 16], [1; 16], 64)
        .tcp(40000, 443, 1, 1024)
        .syn();
    let mut frame = Vec::with_capacity(builder.size(0));
    builder.write(&mut frame, &[]).map_err(|e| e.to_string())?;
    assert_eq!(decode_ethernet(&frame)?.network, Network::Other);

    let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
        .ipv4([10, 0, 0, 5], [10, 0, 0, 1], 64)
        .icmpv4_echo_request(1, 1);
    let mut frame = Vec::with_capacity(builder.size(0));
    builder.write(&mut frame, &[]).map_err(|e| e.to_string())?;
    assert_eq!(transport(&decode_ethernet(&frame)?), &Transport::Other { protocol: 1 });
    Ok(())
}

#[test]
fn test_truncated_frame_is_an_error() {
    assert!(decode_ethernet(&[0x02, 0x00, 0x00]).is_err());
}
