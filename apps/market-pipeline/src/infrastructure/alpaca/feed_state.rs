//! Feed connection state shared with the health server.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::session::SessionState;

/// Externally visible connection state of the upstream feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected and not trying.
    #[default]
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Waiting for the auth acknowledgement.
    Authenticating,
    /// Subscription sent, waiting for confirmation.
    Subscribed,
    /// Forwarding data messages.
    Dispatching,
    /// Waiting out a backoff delay.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase label used in health responses and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribed => "subscribed",
            Self::Dispatching => "dispatching",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl From<SessionState> for ConnectionState {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Disconnected => Self::Disconnected,
            SessionState::Connecting => Self::Connecting,
            SessionState::Authenticating => Self::Authenticating,
            SessionState::Subscribed => Self::Subscribed,
            SessionState::Dispatching => Self::Dispatching,
        }
    }
}

/// Tracks the upstream feed for health reporting.
#[derive(Debug, Default)]
pub struct FeedState {
    state: parking_lot::RwLock<ConnectionState>,
    last_dispatching_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    error_message: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
    events_forwarded: AtomicU64,
    events_dropped: AtomicU64,
}

impl FeedState {
    /// Create a tracker in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state. Reaching `Dispatching` clears the error
    /// and the reconnect counter.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Dispatching {
            *self.last_dispatching_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.error_message.write() = None;
        }
    }

    /// Record the last connection error.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.error_message.write() = Some(message.into());
    }

    /// Count one reconnect attempt.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one inbound text frame.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one event handed to the publisher.
    pub fn increment_forwarded(&self) {
        self.events_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one event dropped because the publisher queue was full.
    pub fn increment_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Last recorded error, cleared on reaching `Dispatching`.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// When the feed last reached `Dispatching`.
    #[must_use]
    pub fn last_dispatching_at(&self) -> Option<DateTime<Utc>> {
        *self.last_dispatching_at.read()
    }

    /// Reconnect attempts since the last `Dispatching`.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Inbound text frames.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Events handed to the publisher.
    #[must_use]
    pub fn events_forwarded(&self) -> u64 {
        self.events_forwarded.load(Ordering::Relaxed)
    }

    /// Events dropped on a full queue.
    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatching_clears_error_and_attempts() {
        let state = FeedState::new();
        state.set_state(ConnectionState::Reconnecting);
        state.set_error("connection reset");
        state.increment_reconnect_attempts();
        state.increment_reconnect_attempts();

        assert_eq!(state.reconnect_attempts(), 2);
        assert_eq!(state.last_error().as_deref(), Some("connection reset"));

        state.set_state(ConnectionState::Dispatching);
        assert_eq!(state.state(), ConnectionState::Dispatching);
        assert_eq!(state.reconnect_attempts(), 0);
        assert!(state.last_error().is_none());
        assert!(state.last_dispatching_at().is_some());
    }

    #[test]
    fn session_states_map_one_to_one() {
        assert_eq!(
            ConnectionState::from(SessionState::Authenticating),
            ConnectionState::Authenticating
        );
        assert_eq!(ConnectionState::Reconnecting.as_str(), "reconnecting");
    }
}
