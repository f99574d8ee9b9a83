use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;
use tokio::time::Instant;

use crate::resolution::{DnsError, ResolutionRecord, ResolutionTable};
use crate::tracker::{Outcome, PendingHandshake};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Destination is the local host.
    Inbound,
    Outbound,
}

/// One correlated connection attempt with its final outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionEvent {
    pub direction: Direction,
    pub outcome: Outcome,
    pub elapsed_ms: u64,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub destination_port: u16,
    /// Name chain that resolved to `destination`, outbound only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.direction {
            Direction::Inbound => "INTCP",
            Direction::Outbound => "OUTTCP",
        };
        write!(
            f,
            "[{tag}] {}({}ms) S:{} D:{} DP:{}",
            self.outcome, self.elapsed_ms, self.source, self.destination, self.destination_port
        )?;
        if let Some(names) = &self.names {
            write!(f, " [{}]", names.join(" "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticEvent {
    pub message: String,
}

impl From<DnsError> for DiagnosticEvent {
    fn from(err: DnsError) -> Self {
        Self { message: err.to_string() }
    }
}

/// Everything the engine hands to the presentation side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Connection(ConnectionEvent),
    /// A DNS answer updated the resolution table.
    Resolution(ResolutionRecord),
    /// Malformed or unsupported DNS input.
    Diagnostic(DiagnosticEvent),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Connection(conn) => write!(f, "{conn}"),
            Event::Resolution(record) => write!(f, "[DNS] {record}"),
            Event::Diagnostic(diag) => write!(f, "[ERR] DNS: {}", diag.message),
        }
    }
}

/// Builds [`ConnectionEvent`]s from terminal handshakes.
#[derive(Debug, Clone, Copy)]
pub struct Emitter {
    local: Ipv4Addr,
}

impl Emitter {
    pub fn new(local: Ipv4Addr) -> Self {
        Self { local }
    }

    pub fn direction(&self, destination: Ipv4Addr) -> Direction {
        if destination == self.local {
            Direction::Inbound
        } else {
            Direction::Outbound
        }
    }

    /// Correlate a terminal handshake with the resolution table. Read only.
    pub fn emit(
        &self,
        handshake: &PendingHandshake,
        table: &ResolutionTable,
        now: Instant,
    ) -> ConnectionEvent {
        let flow = handshake.flow;
        let direction = self.direction(flow.destination);
        let names = match direction {
            Direction::Outbound => table
                .lookup_by_address(flow.destination)
                .map(|record| record.names().to_vec()),
            Direction::Inbound => None,
        };
        let elapsed_ms = u64::try_from(handshake.age(now).as_millis()).unwrap_or(u64::MAX);

        ConnectionEvent {
            direction,
            outcome: handshake.outcome,
            elapsed_ms,
            source: flow.source,
            destination: flow.destination,
            destination_port: flow.destination_port,
            names,
        }
    }
}
