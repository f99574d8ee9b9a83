//! Raw frame bytes to [`Packet`].
//!
//! Link, network and transport headers are sliced with `etherparse`; DNS
//! payloads on UDP source port 53 are parsed with `hickory-proto`. A DNS
//! payload that fails to parse is kept as `dns: None` so the classifier can
//! report it.
//!
//! Frames are usually cut short by the capture snaplen, so slicing is lax:
//! a payload shorter than the IP or UDP length field is accepted as long as
//! the transport header itself is complete.

use etherparse::{LaxNetSlice, LaxSlicedPacket, TransportSlice};
use hickory_proto::op::Message;
use hickory_proto::rr::{Name, RData};
use thiserror::Error;
use tracing::trace;

use crate::packet::{
    dns, AnswerData, DnsAnswer, DnsMessage, DnsQuestion, Network, Packet, TcpSegment, Transport,
    UdpDatagram,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame slicing failed: {0}")]
    Slice(String),
    #[error("unsupported link type: {0}")]
    UnsupportedLink(i32),
}

/// Linux cooked capture v1 header length.
const LINUX_SLL_HEADER_LEN: usize = 16;
const ETHER_TYPE_IPV4: u16 = 0x0800;

/// Framing of captured bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// Bare IP packets, no link header.
    RawIp,
    /// Linux "cooked" capture (the `any` pseudo interface).
    LinuxSll,
}

impl LinkLayer {
    /// Map a libpcap DLT value.
    pub fn from_dlt(dlt: i32) -> Result<Self, DecodeError> {
        match dlt {
            1 => Ok(LinkLayer::Ethernet),
            12 | 101 | 228 => Ok(LinkLayer::RawIp),
            113 => Ok(LinkLayer::LinuxSll),
            other => Err(DecodeError::UnsupportedLink(other)),
        }
    }
}

pub fn decode(link: LinkLayer, bytes: &[u8]) -> Result<Packet, DecodeError> {
    match link {
        LinkLayer::Ethernet => decode_ethernet(bytes),
        LinkLayer::RawIp => decode_ip(bytes),
        LinkLayer::LinuxSll => decode_linux_sll(bytes),
    }
}

pub fn decode_ethernet(bytes: &[u8]) -> Result<Packet, DecodeError> {
    let sliced =
        LaxSlicedPacket::from_ethernet(bytes).map_err(|e| DecodeError::Slice(e.to_string()))?;
    Ok(from_sliced(&sliced))
}

pub fn decode_ip(bytes: &[u8]) -> Result<Packet, DecodeError> {
    let sliced = LaxSlicedPacket::from_ip(bytes).map_err(|e| DecodeError::Slice(e.to_string()))?;
    Ok(from_sliced(&sliced))
}

fn decode_linux_sll(bytes: &[u8]) -> Result<Packet, DecodeError> {
    let Some((header, rest)) = bytes.split_at_checked(LINUX_SLL_HEADER_LEN) else {
        return Err(DecodeError::Slice(format!(
            "linux sll header needs {LINUX_SLL_HEADER_LEN} bytes, got {}",
            bytes.len()
        )));
    };
    let ether_type = u16::from_be_bytes([header[14], header[15]]);
    if ether_type != ETHER_TYPE_IPV4 {
        return Ok(Packet { network: Network::Other });
    }
    decode_ip(rest)
}

fn from_sliced(sliced: &LaxSlicedPacket<'_>) -> Packet {
    let Some(LaxNetSlice::Ipv4(ipv4)) = &sliced.net else {
        return Packet { network: Network::Other };
    };
    let header = ipv4.header();
    if let Some((err, layer)) = &sliced.stop_err {
        trace!(error = %err, ?layer, "frame sliced partially");
    }

    let transport = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => Transport::Tcp(TcpSegment {
            source_port: tcp.source_port(),
            destination_port: tcp.destination_port(),
            syn: tcp.syn(),
            ack: tcp.ack(),
            rst: tcp.rst(),
        }),
        Some(TransportSlice::Udp(udp)) => {
            let source_port = udp.source_port();
            let dns = if source_port == dns::PORT { parse_dns(udp.payload()) } else { None };
            Transport::Udp(UdpDatagram {
                source_port,
                destination_port: udp.destination_port(),
                dns,
            })
        }
        _ => Transport::Other { protocol: header.protocol().0 },
    };

    Packet::ipv4(header.source_addr(), header.destination_addr(), transport)
}

/// Parse a DNS payload into the engine's message model.
pub fn parse_dns(payload: &[u8]) -> Option<DnsMessage> {
    let message = match Message::from_vec(payload) {
        Ok(message) => message,
        Err(e) => {
            trace!(error = %e, len = payload.len(), "undecodable DNS payload");
            return None;
        }
    };

    let questions = message
        .queries()
        .iter()
        .map(|q| DnsQuestion { name: display_name(q.name()), query_type: u16::from(q.query_type()) })
        .collect();

    let answers = message
        .answers()
        .iter()
        .map(|record| {
            let data = match record.data() {
                Some(RData::A(a)) => AnswerData::Address(a.0),
                Some(RData::CNAME(cname)) => AnswerData::Alias(display_name(&cname.0)),
                _ => AnswerData::Other(u16::from(record.record_type())),
            };
            DnsAnswer { name: display_name(record.name()), data }
        })
        .collect();

    Some(DnsMessage { questions, answers, response_code: u16::from(message.response_code()) })
}

/// Domain name without the trailing root label.
fn display_name(name: &Name) -> String {
    let mut text = name.to_utf8();
    if text.len() > 1 && text.ends_with('.') {
        text.pop();
    }
    text
}
