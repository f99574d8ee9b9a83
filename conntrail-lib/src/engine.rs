//! The correlation engine: one classifier driven from one task.
//!
//! Decoded packets and timed-out handshakes are multiplexed onto the same
//! loop, so the resolution table and dedup set are only ever touched from
//! here. The expiry sweep runs as its own task and only reaches the tracker
//! through its lock.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, ClassifierStats};
use crate::config::Config;
use crate::emitter::Emitter;
use crate::output::EventSink;
use crate::packet::Packet;
use crate::tracker::{spawn_expiry, HandshakeTracker, PendingHandshake};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Address of the monitored host, used to tell inbound from outbound.
    pub local_address: Ipv4Addr,
    pub idle_window: Duration,
    pub track_all: bool,
}

impl EngineSettings {
    pub fn from_config(config: &Config, local_address: Ipv4Addr) -> Self {
        Self { local_address, idle_window: config.idle_timeout(), track_all: config.track_all }
    }
}

/// Counters reported when the engine stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub classifier: ClassifierStats,
    /// Handshakes still pending at shutdown; they are never reported.
    pub pending: usize,
    pub names: usize,
}

pub struct Engine {
    classifier: Classifier,
    tracker: Arc<HandshakeTracker>,
}

impl Engine {
    pub fn new(settings: &EngineSettings) -> Self {
        let tracker = Arc::new(HandshakeTracker::new(settings.idle_window));
        let emitter = Emitter::new(settings.local_address);
        let classifier = Classifier::new(Arc::clone(&tracker), emitter, settings.track_all);
        Self { classifier, tracker }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn tracker(&self) -> &Arc<HandshakeTracker> {
        &self.tracker
    }

    pub fn handle_packet<S: EventSink + ?Sized>(&mut self, packet: &Packet, sink: &mut S) {
        self.classifier.classify(packet, Instant::now(), sink);
    }

    pub fn handle_expired<S: EventSink + ?Sized>(
        &mut self,
        handshake: &PendingHandshake,
        sink: &mut S,
    ) {
        self.classifier.expire(handshake, Instant::now(), sink);
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            classifier: self.classifier.stats(),
            pending: self.tracker.pending(),
            names: self.classifier.table().len(),
        }
    }

    /// Process packets until the source closes or `cancel` fires.
    ///
    /// The expiry sweep is started here and stopped before returning.
    pub async fn run<S: EventSink + ?Sized>(
        mut self,
        mut packets: mpsc::Receiver<Packet>,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> EngineStats {
        let (expired_tx, mut expired_rx) = mpsc::unbounded_channel();
        let expiry_cancel = cancel.child_token();
        let expiry = spawn_expiry(Arc::clone(&self.tracker), expired_tx, expiry_cancel.clone());
        info!(
            idle_window = ?self.tracker.idle_window(),
            sweep_interval = ?self.tracker.sweep_interval(),
            "correlation engine started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown signal received, stopping engine");
                    break;
                }
                packet = packets.recv() => match packet {
                    Some(packet) => self.handle_packet(&packet, sink),
                    None => {
                        debug!("packet source closed");
                        break;
                    }
                },
                Some(handshake) = expired_rx.recv() => self.handle_expired(&handshake, sink),
            }
        }

        expiry_cancel.cancel();
        if let Err(e) = expiry.await {
            warn!(error = %e, "expiry task failed");
        }
        // timeouts swept before the task stopped still get reported
        while let Ok(handshake) = expired_rx.try_recv() {
            self.handle_expired(&handshake, sink);
        }

        let stats = self.stats();
        info!(
            packets = stats.classifier.packets,
            tracked = stats.classifier.syns_tracked,
            suppressed = stats.classifier.syns_suppressed,
            matched = stats.classifier.replies_matched,
            unmatched = stats.classifier.replies_unmatched,
            timeouts = stats.classifier.timeouts,
            pending = stats.pending,
            names = stats.names,
            "correlation engine stopped"
        );
        stats
    }
}
