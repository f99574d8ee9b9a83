//! Decoded packet model consumed by the classifier.
//!
//! Produced by [`crate::decode`] from raw frames, or built directly in tests.
//! Only the fields the correlation engine looks at are kept.

use std::net::Ipv4Addr;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub network: Network,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Network {
    Ipv4 { source: Ipv4Addr, destination: Ipv4Addr, transport: Transport },
    /// Anything that is not IPv4 (IPv6, ARP, ...).
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Tcp(TcpSegment),
    Udp(UdpDatagram),
    Other { protocol: u8 },
}

/// TCP header fields relevant to handshake tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSegment {
    pub source_port: u16,
    pub destination_port: u16,
    pub syn: bool,
    pub ack: bool,
    pub rst: bool,
}

impl TcpSegment {
    /// SYN set and ACK clear: a connection-open request from the initiator.
    pub fn is_syn_only(&self) -> bool {
        self.syn && !self.ack
    }

    /// ACK set and SYN clear, RST optional.
    pub fn is_reply(&self) -> bool {
        self.ack && !self.syn
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram {
    pub source_port: u16,
    pub destination_port: u16,
    /// Decoded DNS payload, when the datagram carried one that parsed.
    pub dns: Option<DnsMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DnsMessage {
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsAnswer>,
    pub response_code: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub query_type: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    pub name: String,
    pub data: AnswerData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerData {
    Address(Ipv4Addr),
    Alias(String),
    /// Record types the engine does not interpret, keyed by numeric type.
    Other(u16),
}

/// DNS record and response codes used by the engine.
pub mod dns {
    pub const TYPE_A: u16 = 1;
    pub const TYPE_PTR: u16 = 12;
    pub const TYPE_AAAA: u16 = 28;
    /// HTTPS service binding, sent alongside A/AAAA by Apple resolvers.
    pub const TYPE_HTTPS: u16 = 65;

    pub const RCODE_NO_ERROR: u16 = 0;
    pub const RCODE_NXDOMAIN: u16 = 3;

    pub const PORT: u16 = 53;
}

impl Packet {
    pub fn ipv4(source: Ipv4Addr, destination: Ipv4Addr, transport: Transport) -> Self {
        Self { network: Network::Ipv4 { source, destination, transport } }
    }

    pub fn tcp(
        source: Ipv4Addr,
        source_port: u16,
        destination: Ipv4Addr,
        destination_port: u16,
        flags: TcpFlags,
    ) -> Self {
        Self::ipv4(
            source,
            destination,
            Transport::Tcp(TcpSegment {
                source_port,
                destination_port,
                syn: flags.syn,
                ack: flags.ack,
                rst: flags.rst,
            }),
        )
    }

    pub fn dns_response(source: Ipv4Addr, destination: Ipv4Addr, message: DnsMessage) -> Self {
        Self::ipv4(
            source,
            destination,
            Transport::Udp(UdpDatagram {
                source_port: dns::PORT,
                destination_port: 0,
                dns: Some(message),
            }),
        )
    }
}

/// Flag set used when building TCP packets by hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub rst: bool,
}

impl TcpFlags {
    pub const SYN: Self = Self { syn: true, ack: false, rst: false };
    pub const SYN_ACK: Self = Self { syn: true, ack: true, rst: false };
    pub const ACK: Self = Self { syn: false, ack: true, rst: false };
    pub const RST_ACK: Self = Self { syn: false, ack: true, rst: true };
    pub const RST: Self = Self { syn: false, ack: false, rst: true };
}
