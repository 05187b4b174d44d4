//! Per-connection heartbeat scheduling.
//!
//! Each registered connection gets one task that periodically sends a
//! heartbeat message. A failed send, or an idle connection when an idle
//! timeout is configured, disconnects that connection only.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::ConnectionId;
use crate::registry::WeakRegistry;

/// Result of one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatOutcome {
    /// Probe enqueued.
    Sent,
    /// Connection no longer registered.
    Gone,
    /// Probe could not be delivered.
    Failed,
    /// No inbound activity within the idle timeout.
    Idle,
}

/// Handle to a running heartbeat task. Dropping it cancels the task.
#[derive(Debug)]
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Cancels the heartbeat task.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Returns true if the task has finished or been cancelled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns heartbeat tasks for registered connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatScheduler {
    interval: Option<Duration>,
    idle_timeout: Option<Duration>,
}

impl HeartbeatScheduler {
    /// Creates a scheduler. A `None` or zero interval disables heartbeats.
    #[must_use]
    pub fn new(interval: Option<Duration>, idle_timeout: Option<Duration>) -> Self {
        Self {
            interval: interval.filter(|i| !i.is_zero()),
            idle_timeout,
        }
    }

    /// Returns the heartbeat interval, if enabled.
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Starts the heartbeat task for a connection.
    ///
    /// Returns `None` when heartbeats are disabled.
    pub(crate) fn schedule(
        &self,
        connection_id: ConnectionId,
        registry: WeakRegistry,
    ) -> Option<HeartbeatHandle> {
        let interval = self.interval?;
        let idle_timeout = self.idle_timeout;
        let task = tokio::spawn(run(connection_id, interval, idle_timeout, registry));
        Some(HeartbeatHandle { task })
    }
}

async fn run(
    connection_id: ConnectionId,
    interval: Duration,
    idle_timeout: Option<Duration>,
    registry: WeakRegistry,
) {
    loop {
        tokio::time::sleep(interval).await;

        let Some(registry) = registry.upgrade() else {
            break;
        };

        match registry.heartbeat(connection_id, idle_timeout).await {
            HeartbeatOutcome::Sent => {}
            HeartbeatOutcome::Gone => break,
            HeartbeatOutcome::Failed => {
                debug!(connection_id = %connection_id, "Heartbeat delivery failed");
                registry.disconnect(connection_id, "heartbeat failed").await;
                break;
            }
            HeartbeatOutcome::Idle => {
                debug!(connection_id = %connection_id, "Connection idle");
                registry.disconnect(connection_id, "idle timeout").await;
                break;
            }
        }
    }
}
