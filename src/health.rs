use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::event::SessionEvent;

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_STALL_THRESHOLD_MS: u64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamHealthState {
    Disconnected,
    Connecting,
    Connected,
    Stalled,
    Error,
}

impl StreamHealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stalled => "stalled",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for StreamHealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthTransition {
    pub epoch: u64,
    pub from: StreamHealthState,
    pub to: StreamHealthState,
    pub at_ms: u64,
    pub reason: Option<String>,
}

/// Connectivity and staleness of one session's feed.
///
/// Every state change is pushed to subscribers; nothing needs to poll.
/// Staleness is measured from the last tick, or from the moment the channel
/// connected if no tick has arrived yet.
#[derive(Debug)]
pub struct StreamHealthMonitor {
    epoch: u64,
    state: StreamHealthState,
    stall_threshold_ms: u64,
    last_activity_ms: Option<u64>,
    last_error: Option<String>,
    transitions: broadcast::Sender<HealthTransition>,
}

impl StreamHealthMonitor {
    pub fn new(epoch: u64, stall_threshold_ms: u64, transitions: broadcast::Sender<HealthTransition>) -> Self {
        Self {
            epoch,
            state: StreamHealthState::Disconnected,
            stall_threshold_ms,
            last_activity_ms: None,
            last_error: None,
            transitions,
        }
    }

    /// Monitor with a private channel, for callers that only read `state()`.
    pub fn detached(epoch: u64, stall_threshold_ms: u64) -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self::new(epoch, stall_threshold_ms, tx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthTransition> {
        self.transitions.subscribe()
    }

    pub fn state(&self) -> StreamHealthState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_activity_ms(&self) -> Option<u64> {
        self.last_activity_ms
    }

    pub fn on_connected(&mut self, now_ms: u64) {
        match self.state {
            StreamHealthState::Disconnected | StreamHealthState::Connecting => {
                self.last_activity_ms = Some(now_ms);
                self.last_error = None;
                self.transition(StreamHealthState::Connected, now_ms, None);
            }
            other => {
                tracing::debug!(epoch = self.epoch, state = %other, "Ignoring connect in current state");
            }
        }
    }

    pub fn on_tick(&mut self, now_ms: u64) {
        self.last_activity_ms = Some(self.last_activity_ms.map_or(now_ms, |t| t.max(now_ms)));
        if self.state == StreamHealthState::Stalled {
            self.transition(StreamHealthState::Connected, now_ms, None);
        }
    }

    /// Periodic staleness check. Returns the state after the check.
    pub fn on_heartbeat(&mut self, now_ms: u64) -> StreamHealthState {
        if self.state == StreamHealthState::Connected {
            let idle_ms = self
                .last_activity_ms
                .map_or(0, |t| now_ms.saturating_sub(t));
            if idle_ms > self.stall_threshold_ms {
                self.transition(
                    StreamHealthState::Stalled,
                    now_ms,
                    Some(format!("no ticks for {} ms", idle_ms)),
                );
            }
        }
        self.state
    }

    pub fn on_error(&mut self, message: &str, now_ms: u64) {
        self.last_error = Some(message.to_string());
        self.transition(StreamHealthState::Error, now_ms, Some(message.to_string()));
    }

    pub fn on_reconnect(&mut self, now_ms: u64) {
        self.transition(StreamHealthState::Connecting, now_ms, Some("reconnect requested".to_string()));
    }

    pub fn on_stop(&mut self, now_ms: u64) {
        self.transition(StreamHealthState::Disconnected, now_ms, Some("stopped".to_string()));
    }

    fn transition(&mut self, to: StreamHealthState, now_ms: u64, reason: Option<String>) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        tracing::info!(epoch = self.epoch, from = %from, to = %to, reason = ?reason, "Stream health changed");
        // No receivers is fine; snapshots still carry the state.
        let _ = self.transitions.send(HealthTransition {
            epoch: self.epoch,
            from,
            to,
            at_ms: now_ms,
            reason,
        });
    }
}

/// Periodic staleness check posted into the session inbox.
///
/// `cancel` consumes the handle, so a heartbeat can be stopped only once.
#[derive(Debug)]
pub struct Heartbeat {
    task: JoinHandle<()>,
}

impl Heartbeat {
    pub fn spawn(epoch: u64, interval: Duration, inbox: mpsc::Sender<SessionEvent>) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick of `interval` completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let event = SessionEvent::HeartbeatCheck {
                    epoch,
                    now_ms: crate::now_ms(),
                };
                if inbox.send(event).await.is_err() {
                    break;
                }
            }
        });
        Self { task }
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}
