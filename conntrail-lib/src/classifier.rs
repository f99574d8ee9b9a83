//! Per-packet dispatch to the resolution table and the handshake tracker.

use std::net::Ipv4Addr;
use std::sync::Arc;

use ahash::AHashSet;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::emitter::{DiagnosticEvent, Emitter, Event};
use crate::output::EventSink;
use crate::packet::{dns, Network, Packet, TcpSegment, Transport, UdpDatagram};
use crate::resolution::{DnsError, DnsOutcome, ResolutionTable};
use crate::tracker::{FlowKey, HandshakeTracker, PendingHandshake};

/// Connection identity used for dedup suppression: the source port is left
/// out so repeated attempts to the same service collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub destination_port: u16,
}

impl From<&FlowKey> for DedupKey {
    fn from(flow: &FlowKey) -> Self {
        Self {
            source: flow.source,
            destination: flow.destination,
            destination_port: flow.destination_port,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierStats {
    pub packets: u64,
    pub unsupported: u64,
    pub dns_answers: u64,
    pub dns_diagnostics: u64,
    pub syns_tracked: u64,
    pub syns_suppressed: u64,
    pub syns_retransmitted: u64,
    pub replies_matched: u64,
    pub replies_unmatched: u64,
    pub timeouts: u64,
}

pub struct Classifier {
    table: ResolutionTable,
    tracker: Arc<HandshakeTracker>,
    emitter: Emitter,
    seen: AHashSet<DedupKey>,
    track_all: bool,
    stats: ClassifierStats,
}

impl Classifier {
    /// With `track_all` set, dedup keys are never marked as seen, so every
    /// connection attempt is tracked and reported.
    pub fn new(tracker: Arc<HandshakeTracker>, emitter: Emitter, track_all: bool) -> Self {
        Self {
            table: ResolutionTable::new(),
            tracker,
            emitter,
            seen: AHashSet::new(),
            track_all,
            stats: ClassifierStats::default(),
        }
    }

    pub fn table(&self) -> &ResolutionTable {
        &self.table
    }

    pub fn tracker(&self) -> &Arc<HandshakeTracker> {
        &self.tracker
    }

    pub fn stats(&self) -> ClassifierStats {
        self.stats
    }

    pub fn classify<S: EventSink + ?Sized>(&mut self, packet: &Packet, now: Instant, sink: &mut S) {
        self.stats.packets = self.stats.packets.saturating_add(1);

        let (source, destination, transport) = match &packet.network {
            Network::Ipv4 { source, destination, transport } => (*source, *destination, transport),
            Network::Other => {
                trace!("dropping non-IPv4 packet");
                self.stats.unsupported = self.stats.unsupported.saturating_add(1);
                return;
            }
        };

        match transport {
            Transport::Udp(udp) if udp.source_port == dns::PORT => {
                self.classify_dns(source, udp, sink);
            }
            Transport::Udp(_) => {}
            Transport::Tcp(tcp) => self.classify_tcp(source, destination, tcp, now, sink),
            Transport::Other { protocol } => {
                trace!(protocol, "ignoring transport");
            }
        }
    }

    fn classify_dns<S: EventSink + ?Sized>(
        &mut self,
        server: Ipv4Addr,
        udp: &UdpDatagram,
        sink: &mut S,
    ) {
        let result = match &udp.dns {
            Some(message) => self.table.process(message),
            None => Err(DnsError::Malformed { server }),
        };

        match result {
            Ok(DnsOutcome::Updated(record)) => {
                self.stats.dns_answers = self.stats.dns_answers.saturating_add(1);
                sink.emit(Event::Resolution(record.clone()));
            }
            Ok(DnsOutcome::Ignored { query_type }) => {
                trace!(query_type, "ignoring DNS answer");
            }
            Err(err) => {
                debug!(%server, error = %err, "DNS diagnostic");
                self.stats.dns_diagnostics = self.stats.dns_diagnostics.saturating_add(1);
                sink.emit(Event::Diagnostic(DiagnosticEvent::from(err)));
            }
        }
    }

    fn classify_tcp<S: EventSink + ?Sized>(
        &mut self,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        tcp: &TcpSegment,
        now: Instant,
        sink: &mut S,
    ) {
        if tcp.destination_port == 0 {
            return;
        }
        let flow = FlowKey::new(source, tcp.source_port, destination, tcp.destination_port);

        if tcp.is_syn_only() {
            self.track_syn(flow, now);
        } else if tcp.is_reply() {
            match self.tracker.observe_reply(flow, tcp.rst, now) {
                Some(handshake) => {
                    self.stats.replies_matched = self.stats.replies_matched.saturating_add(1);
                    self.emit_connection(&handshake, now, sink);
                }
                None => {
                    self.stats.replies_unmatched = self.stats.replies_unmatched.saturating_add(1);
                }
            }
        }
    }

    fn track_syn(&mut self, flow: FlowKey, now: Instant) {
        let key = DedupKey::from(&flow);
        if self.seen.contains(&key) {
            trace!(%flow, "suppressing repeated connection");
            self.stats.syns_suppressed = self.stats.syns_suppressed.saturating_add(1);
            return;
        }
        if !self.track_all {
            self.seen.insert(key);
        }
        if self.tracker.observe_syn(flow, now) {
            self.stats.syns_tracked = self.stats.syns_tracked.saturating_add(1);
        } else {
            self.stats.syns_retransmitted = self.stats.syns_retransmitted.saturating_add(1);
        }
    }

    /// Emit a handshake the expiry sweep already removed from the tracker.
    pub fn expire<S: EventSink + ?Sized>(
        &mut self,
        handshake: &PendingHandshake,
        now: Instant,
        sink: &mut S,
    ) {
        self.stats.timeouts = self.stats.timeouts.saturating_add(1);
        self.emit_connection(handshake, now, sink);
    }

    fn emit_connection<S: EventSink + ?Sized>(
        &self,
        handshake: &PendingHandshake,
        now: Instant,
        sink: &mut S,
    ) {
        let event = self.emitter.emit(handshake, &self.table, now);
        sink.emit(Event::Connection(event));
    }
}
