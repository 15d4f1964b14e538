//! Stream Session State Machine
//!
//! Drives the three-phase handshake for one connection:
//!
//! ```text
//! Disconnected ─begin─► Connecting ─on_open─► Authenticating
//!                                                 │ success "authenticated"
//!                                                 ▼  (send subscribe)
//!                          Dispatching ◄────── Subscribed
//!                                subscription confirmation
//! ```
//!
//! The session performs no I/O. It returns a [`Step`] per inbound message
//! and the client performs it. A session lives for one connection: any
//! error drops it, and the supervisor starts a new one on a fresh socket.

use thiserror::Error;

use super::auth::{AuthError, Credentials};
use super::messages::{AlpacaMessage, ErrorMessage, SubscriptionRequest, SuccessKind};

/// Connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Socket being opened.
    Connecting,
    /// Auth frame sent, awaiting `authenticated`.
    Authenticating,
    /// Subscribe frame sent, awaiting confirmation.
    Subscribed,
    /// Steady state: data messages are dispatched.
    Dispatching,
}

impl SessionState {
    /// Lowercase name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribed => "subscribed",
            Self::Dispatching => "dispatching",
        }
    }
}

/// What the client should do with an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Send this text frame.
    Reply(String),
    /// Handshake complete; dispatching starts now.
    Ready {
        /// Confirmed trade subscriptions.
        trades: usize,
        /// Confirmed bar subscriptions.
        bars: usize,
    },
    /// Data message: hand it to the feed adapter.
    Dispatch,
    /// Server reported an error after the handshake.
    ServerError(ErrorMessage),
    /// Nothing to do.
    Ignore,
}

/// Session failures. All of them end the connection.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Server rejected the handshake.
    #[error("handshake rejected: {0}")]
    Rejected(#[from] AuthError),

    /// Operation invalid in the current state.
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        /// Attempted action.
        action: &'static str,
        /// Current state name.
        state: &'static str,
    },

    /// Outbound frame could not be encoded.
    #[error("failed to encode {0} frame")]
    Encode(&'static str),
}

/// Handshake state for one connection.
#[derive(Debug)]
pub struct Session {
    credentials: Credentials,
    subscription: SubscriptionRequest,
    state: SessionState,
}

impl Session {
    /// Create a disconnected session.
    #[must_use]
    pub const fn new(credentials: Credentials, subscription: SubscriptionRequest) -> Self {
        Self {
            credentials,
            subscription,
            state: SessionState::Disconnected,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether data messages are being dispatched.
    #[must_use]
    pub const fn is_dispatching(&self) -> bool {
        matches!(self.state, SessionState::Dispatching)
    }

    /// A new socket is being opened.
    pub const fn begin(&mut self) {
        self.state = SessionState::Connecting;
    }

    /// Socket opened; returns the auth frame to send.
    ///
    /// # Errors
    ///
    /// Fails if called outside `Connecting` or if encoding fails.
    pub fn on_open(&mut self) -> Result<String, SessionError> {
        if self.state != SessionState::Connecting {
            return Err(self.invalid("send auth"));
        }
        let frame = serde_json::to_string(&self.credentials.to_auth_request())
            .map_err(|_| SessionError::Encode("auth"))?;
        self.state = SessionState::Authenticating;
        Ok(frame)
    }

    /// Advance on an inbound message.
    ///
    /// # Errors
    ///
    /// Fails when the server rejects the handshake.
    pub fn handle(&mut self, message: &AlpacaMessage) -> Result<Step, SessionError> {
        match message {
            AlpacaMessage::Success(success) => match (success.msg, self.state) {
                (SuccessKind::Authenticated, SessionState::Authenticating) => {
                    let frame = serde_json::to_string(&self.subscription)
                        .map_err(|_| SessionError::Encode("subscribe"))?;
                    self.state = SessionState::Subscribed;
                    Ok(Step::Reply(frame))
                }
                _ => Ok(Step::Ignore),
            },
            AlpacaMessage::Error(error) => {
                if self.is_dispatching() {
                    Ok(Step::ServerError(error.clone()))
                } else {
                    Err(SessionError::Rejected(AuthError::from(error)))
                }
            }
            AlpacaMessage::Subscription(sub) => {
                if self.state == SessionState::Subscribed {
                    self.state = SessionState::Dispatching;
                    Ok(Step::Ready {
                        trades: sub.trades.len(),
                        bars: sub.bars.len(),
                    })
                } else {
                    Ok(Step::Ignore)
                }
            }
            AlpacaMessage::Trade(_) | AlpacaMessage::Bar(..) => {
                if self.is_dispatching() {
                    Ok(Step::Dispatch)
                } else {
                    Ok(Step::Ignore)
                }
            }
            AlpacaMessage::Unrecognized(_) => Ok(Step::Ignore),
        }
    }

    const fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            action,
            state: self.state.as_str(),
        }
    }
}
