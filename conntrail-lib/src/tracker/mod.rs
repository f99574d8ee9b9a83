//! Pending TCP handshake store with time-bounded entries.
//!
//! A SYN opens an entry keyed by its ordered flow tuple. The entry leaves the
//! store exactly once: either a reply on the reversed tuple claims it
//! ([`HandshakeTracker::observe_reply`]) or the expiry sweep does
//! ([`HandshakeTracker::sweep`]). Both paths take the same lock, so the first
//! one to reach an entry owns its terminal transition.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ahash::AHashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Default time a SYN may wait for its reply.
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_millis(800);

/// Sweep period as a multiple of the idle window.
const SWEEP_FACTOR: u32 = 2;

/// Ordered `(source, destination, source_port, destination_port)` of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub source_port: u16,
    pub destination_port: u16,
}

impl FlowKey {
    pub fn new(
        source: Ipv4Addr,
        source_port: u16,
        destination: Ipv4Addr,
        destination_port: u16,
    ) -> Self {
        Self { source, destination, source_port, destination_port }
    }

    /// Key of the opposite direction of the same connection.
    pub fn reversed(&self) -> Self {
        Self {
            source: self.destination,
            destination: self.source,
            source_port: self.destination_port,
            destination_port: self.source_port,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source, self.source_port, self.destination, self.destination_port
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ACK")]
    Acked,
    #[serde(rename = "RST")]
    Reset,
    #[serde(rename = "TIMEOUT")]
    TimedOut,
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Pending => "PENDING",
            Outcome::Acked => "ACK",
            Outcome::Reset => "RST",
            Outcome::TimedOut => "TIMEOUT",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingHandshake {
    pub flow: FlowKey,
    pub created_at: Instant,
    pub acknowledged: bool,
    pub outcome: Outcome,
}

impl PendingHandshake {
    fn new(flow: FlowKey, created_at: Instant) -> Self {
        Self { flow, created_at, acknowledged: false, outcome: Outcome::Pending }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

#[derive(Debug)]
pub struct HandshakeTracker {
    idle_window: Duration,
    pending: Mutex<AHashMap<FlowKey, PendingHandshake>>,
}

impl Default for HandshakeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_WINDOW)
    }
}

impl HandshakeTracker {
    pub fn new(idle_window: Duration) -> Self {
        Self { idle_window, pending: Mutex::new(AHashMap::new()) }
    }

    pub fn idle_window(&self) -> Duration {
        self.idle_window
    }

    pub fn sweep_interval(&self) -> Duration {
        self.idle_window.saturating_mul(SWEEP_FACTOR)
    }

    fn entries(&self) -> MutexGuard<'_, AHashMap<FlowKey, PendingHandshake>> {
        self.pending.lock().unwrap_or_else(|poisoned| {
            warn!("handshake tracker lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Start tracking a SYN. Returns `false` if the flow is already pending
    /// (a retransmitted SYN).
    pub fn observe_syn(&self, flow: FlowKey, now: Instant) -> bool {
        let mut entries = self.entries();
        if entries.contains_key(&flow) {
            trace!(%flow, "SYN already pending");
            return false;
        }
        entries.insert(flow, PendingHandshake::new(flow, now));
        trace!(%flow, pending = entries.len(), "tracking SYN");
        true
    }

    /// Match a reply against the pending SYN on the reversed tuple.
    ///
    /// The returned handshake has already left the store and carries its
    /// terminal outcome.
    pub fn observe_reply(
        &self,
        reply: FlowKey,
        is_reset: bool,
        now: Instant,
    ) -> Option<PendingHandshake> {
        let mut handshake = self.entries().remove(&reply.reversed())?;
        handshake.acknowledged = true;
        handshake.outcome = if is_reset { Outcome::Reset } else { Outcome::Acked };
        trace!(flow = %handshake.flow, outcome = ?handshake.outcome, elapsed = ?handshake.age(now), "handshake resolved");
        Some(handshake)
    }

    /// Remove every entry whose age has reached the idle window. Entries that
    /// never saw a reply come back as [`Outcome::TimedOut`].
    pub fn sweep(&self, now: Instant) -> Vec<PendingHandshake> {
        let idle = self.idle_window;
        let mut expired = Vec::new();
        self.entries().retain(|_, handshake| {
            if handshake.age(now) < idle {
                return true;
            }
            if !handshake.acknowledged {
                handshake.outcome = Outcome::TimedOut;
                expired.push(*handshake);
            }
            false
        });
        expired
    }

    /// Number of handshakes still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.entries().len()
    }

    pub fn is_pending(&self, flow: &FlowKey) -> bool {
        self.entries().contains_key(flow)
    }
}

/// Run the expiry sweep every [`HandshakeTracker::sweep_interval`] until
/// `cancel` fires or the receiving side of `expired` is dropped.
///
/// Timed-out handshakes are sent after the lock is released; the receiver is
/// responsible for emitting them.
pub fn spawn_expiry(
    tracker: Arc<HandshakeTracker>,
    expired: mpsc::UnboundedSender<PendingHandshake>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = tracker.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(?period, "handshake expiry started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let timed_out = tracker.sweep(Instant::now());
                    if !timed_out.is_empty() {
                        trace!(count = timed_out.len(), "handshakes timed out");
                    }
                    for handshake in timed_out {
                        if expired.send(handshake).is_err() {
                            debug!("expiry receiver closed, stopping sweep");
                            return;
                        }
                    }
                }
            }
        }
        debug!("handshake expiry stopped");
    })
}
