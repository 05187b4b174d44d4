//! Relay counters.
//!
//! Monotonic atomic counters updated by the registry, broker, dispatcher
//! and heartbeat tasks, and read through [`RelayMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Counters for the messaging core.
#[derive(Debug)]
pub struct RelayMetrics {
    registered: AtomicU64,
    unregistered: AtomicU64,
    handshakes_rejected: AtomicU64,
    frames_received: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    channel_joins: AtomicU64,
    channel_leaves: AtomicU64,
    heartbeats: AtomicU64,
    started: Instant,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl RelayMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registered: AtomicU64::new(0),
            unregistered: AtomicU64::new(0),
            handshakes_rejected: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            channel_joins: AtomicU64::new(0),
            channel_leaves: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// A connection entered the registry.
    pub fn record_registered(&self) {
        bump(&self.registered, 1);
    }

    /// A connection left the registry.
    pub fn record_unregistered(&self) {
        bump(&self.unregistered, 1);
    }

    /// A handshake was refused by auth or capacity.
    pub fn record_handshake_rejected(&self) {
        bump(&self.handshakes_rejected, 1);
    }

    /// An inbound frame reached the dispatcher.
    pub fn record_frame_received(&self) {
        bump(&self.frames_received, 1);
    }

    /// Frames were enqueued.
    pub fn record_deliveries(&self, count: usize) {
        bump(&self.deliveries, u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// An enqueue failed and evicted its connection.
    pub fn record_delivery_failure(&self) {
        bump(&self.delivery_failures, 1);
    }

    /// A connection joined a channel.
    pub fn record_channel_join(&self) {
        bump(&self.channel_joins, 1);
    }

    /// A connection left a channel.
    pub fn record_channel_leave(&self) {
        bump(&self.channel_leaves, 1);
    }

    /// A heartbeat probe went out.
    pub fn record_heartbeat(&self) {
        bump(&self.heartbeats, 1);
    }

    /// Connections currently registered.
    #[must_use]
    pub fn live(&self) -> u64 {
        read(&self.registered).saturating_sub(read(&self.unregistered))
    }

    /// Handshakes refused so far.
    #[must_use]
    pub fn handshakes_rejected(&self) -> u64 {
        read(&self.handshakes_rejected)
    }

    /// Deliveries that failed so far.
    #[must_use]
    pub fn delivery_failures(&self) -> u64 {
        read(&self.delivery_failures)
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            registered: read(&self.registered),
            unregistered: read(&self.unregistered),
            live: self.live(),
            handshakes_rejected: self.handshakes_rejected(),
            frames_received: read(&self.frames_received),
            deliveries: read(&self.deliveries),
            delivery_failures: self.delivery_failures(),
            channel_joins: read(&self.channel_joins),
            channel_leaves: read(&self.channel_leaves),
            heartbeats: read(&self.heartbeats),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Counter values at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayMetricsSnapshot {
    /// Connections ever registered.
    pub registered: u64,
    /// Connections ever unregistered.
    pub unregistered: u64,
    /// Connections registered now.
    pub live: u64,
    /// Refused handshakes.
    pub handshakes_rejected: u64,
    /// Inbound frames.
    pub frames_received: u64,
    /// Enqueued frames.
    pub deliveries: u64,
    /// Failed enqueues.
    pub delivery_failures: u64,
    /// Channel joins.
    pub channel_joins: u64,
    /// Channel leaves.
    pub channel_leaves: u64,
    /// Heartbeat probes.
    pub heartbeats: u64,
    /// Seconds since the counters were created.
    pub uptime_secs: u64,
}
