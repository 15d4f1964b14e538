//! Stream Client
//!
//! Owns the market-data WebSocket: connect, authenticate, subscribe, then
//! forward every trade and bar to the publisher queue. Reconnects with
//! exponential backoff until cancelled.
//!
//! # Stream URL
//!
//! - IEX: `wss://stream.data.alpaca.markets/v2/iex`
//! - SIP: `wss://stream.data.alpaca.markets/v2/sip`
//!
//! Data reaches the publisher only while the session is `Dispatching`.
//! The queue is bounded; when it is full the event is dropped and counted
//! so that a slow event log never stalls the socket reader.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::adapter;
use super::auth::{AUTH_TIMEOUT, Credentials};
use super::codec::{CodecError, JsonCodec};
use super::feed_state::{ConnectionState, FeedState};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, Liveness};
use super::messages::{AlpacaMessage, SubscriptionRequest};
use super::session::{Session, SessionError, Step};
use crate::domain::backoff::{BackoffConfig, BackoffPolicy};
use crate::domain::market_data::MarketEvent;
use crate::infrastructure::metrics::{self, DropReason};

/// Default IEX stream endpoint.
pub const DEFAULT_STREAM_URL: &str = "wss://stream.data.alpaca.markets/v2/iex";

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one connection attempt (or the client).
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// Socket could not be opened in time.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Handshake rejected or out of order.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Auth and subscription did not complete within the deadline.
    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    /// No inbound traffic after a ping.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Server closed the socket.
    #[error("connection closed")]
    ConnectionClosed,

    /// Publisher queue receiver is gone.
    #[error("publisher queue closed")]
    PublisherClosed,

    /// Backoff policy ran out of attempts.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

impl StreamClientError {
    /// Whether the client should stop instead of reconnecting.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PublisherClosed | Self::MaxReconnectAttemptsExceeded
        )
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream client.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// API credentials.
    pub credentials: Credentials,
    /// Symbols to subscribe for trades and bars.
    pub symbols: Vec<String>,
    /// Also subscribe to corrected (`u`) bars.
    pub updated_bars: bool,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Deadline from connect to `Dispatching`.
    pub handshake_timeout: Duration,
}

impl StreamClientConfig {
    /// Create a configuration with default timing.
    #[must_use]
    pub fn new(url: impl Into<String>, credentials: Credentials, symbols: Vec<String>) -> Self {
        Self {
            url: url.into(),
            credentials,
            symbols,
            updated_bars: true,
            backoff: BackoffConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            handshake_timeout: AUTH_TIMEOUT,
        }
    }

    /// Subscribe frame for the configured symbols.
    #[must_use]
    pub fn subscription(&self) -> SubscriptionRequest {
        let request = SubscriptionRequest::subscribe(&self.symbols);
        if self.updated_bars {
            request.with_updated_bars()
        } else {
            request
        }
    }
}

// =============================================================================
// Stream Client
// =============================================================================

/// Market-data WebSocket client.
pub struct StreamClient {
    config: StreamClientConfig,
    codec: JsonCodec,
    event_tx: mpsc::Sender<MarketEvent>,
    state: Arc<FeedState>,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Create a client that forwards events to `event_tx`.
    #[must_use]
    pub const fn new(
        config: StreamClientConfig,
        event_tx: mpsc::Sender<MarketEvent>,
        state: Arc<FeedState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: JsonCodec::new(),
            event_tx,
            state,
            cancel,
        }
    }

    /// Shared feed state for health reporting.
    #[must_use]
    pub fn feed_state(&self) -> Arc<FeedState> {
        Arc::clone(&self.state)
    }

    /// Run the connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error only when reconnecting makes no sense: the publisher
    /// queue is closed or the backoff policy is exhausted.
    pub async fn run(self: Arc<Self>) -> Result<(), StreamClientError> {
        let mut policy = BackoffPolicy::new(self.config.backoff.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Stream client cancelled");
                break;
            }

            match self.connect_and_run(&mut policy).await {
                Ok(()) => {
                    tracing::info!("Stream connection closed gracefully");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Stream client stopping");
                    self.state.set_error(e.to_string());
                    self.state.set_state(ConnectionState::Disconnected);
                    metrics::set_feed_dispatching(false);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Stream connection error");
                    self.state.set_error(e.to_string());
                    metrics::set_feed_dispatching(false);

                    let Some(delay) = policy.next_delay() else {
                        self.state.set_state(ConnectionState::Disconnected);
                        return Err(StreamClientError::MaxReconnectAttemptsExceeded);
                    };

                    let attempt = policy.attempt_count();
                    self.state.set_state(ConnectionState::Reconnecting);
                    self.state.increment_reconnect_attempts();
                    metrics::record_reconnect();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to market data stream"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Stream client cancelled during reconnect delay");
                            break;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.state.set_state(ConnectionState::Disconnected);
        metrics::set_feed_dispatching(false);
        Ok(())
    }

    /// One connection: open, handshake, dispatch until error or cancellation.
    async fn connect_and_run(&self, policy: &mut BackoffPolicy) -> Result<(), StreamClientError> {
        let mut session = Session::new(
            self.config.credentials.clone(),
            self.config.subscription(),
        );
        session.begin();
        self.state.set_state(session.state().into());
        tracing::info!(url = %self.config.url, "Connecting to market data stream");

        let connect = tokio::time::timeout(
            self.config.handshake_timeout,
            tokio_tungstenite::connect_async(self.config.url.as_str()),
        );
        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = connect => result.map_err(|_| {
                StreamClientError::ConnectionFailed(format!(
                    "no connection within {:?}",
                    self.config.handshake_timeout
                ))
            })??,
        };
        let (mut write, mut read) = ws_stream.split();

        let auth = session.on_open()?;
        write.send(Message::Text(auth.into())).await?;
        self.state.set_state(session.state().into());
        tracing::debug!(key = %self.config.credentials.key(), "Sent auth request");

        // Heartbeat lives exactly as long as this connection.
        let liveness = Arc::new(Liveness::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatMonitor::new(
                self.config.heartbeat.clone(),
                Arc::clone(&liveness),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );
        let mut heartbeat_alive = true;

        let handshake_deadline = tokio::time::sleep(self.config.handshake_timeout);
        tokio::pin!(handshake_deadline);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::debug!(error = %e, "Close frame not delivered");
                    }
                    return Ok(());
                }
                () = &mut handshake_deadline, if !session.is_dispatching() => {
                    return Err(StreamClientError::HandshakeTimeout(self.config.handshake_timeout));
                }
                event = heartbeat_rx.recv(), if heartbeat_alive => {
                    match event {
                        Some(HeartbeatEvent::SendPing) => {
                            liveness.mark_ping_sent();
                            write.send(Message::Ping(Vec::new().into())).await?;
                        }
                        Some(HeartbeatEvent::Timeout) => {
                            return Err(StreamClientError::HeartbeatTimeout);
                        }
                        None => heartbeat_alive = false,
                    }
                }
                frame = read.next() => {
                    let Some(frame) = frame else {
                        tracing::info!("WebSocket stream ended");
                        return Err(StreamClientError::ConnectionClosed);
                    };
                    let frame = frame?;
                    liveness.record_inbound();

                    match frame {
                        Message::Text(text) => {
                            self.state.increment_messages();
                            metrics::record_frame_received();

                            let before = session.state();
                            self.handle_text(text.as_str(), &mut session, &mut write).await?;
                            let after = session.state();

                            if after != before {
                                self.state.set_state(after.into());
                                if session.is_dispatching() {
                                    policy.reset();
                                    metrics::set_feed_dispatching(true);
                                }
                            }
                        }
                        Message::Ping(data) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Message::Close(frame) => {
                            tracing::info!(?frame, "Server sent close frame");
                            return Err(StreamClientError::ConnectionClosed);
                        }
                        Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
                    }
                }
            }
        }
    }

    /// Decode one text frame and drive the session with each message.
    async fn handle_text<W>(
        &self,
        text: &str,
        session: &mut Session,
        write: &mut W,
    ) -> Result<(), StreamClientError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                log_malformed(&e);
                return Ok(());
            }
        };

        for rejected in &frame.rejected {
            log_malformed(rejected);
        }

        for message in &frame.messages {
            match session.handle(message)? {
                Step::Reply(reply) => {
                    write.send(Message::Text(reply.into())).await?;
                }
                Step::Ready { trades, bars } => {
                    tracing::info!(trades, bars, "Subscription confirmed, dispatching");
                }
                Step::Dispatch => self.dispatch(message)?,
                Step::ServerError(error) => {
                    tracing::error!(code = error.code, msg = %error.msg, "Stream reported error");
                    self.state.set_error(format!("{}: {}", error.code, error.msg));
                }
                Step::Ignore => {
                    tracing::trace!(state = session.state().as_str(), "Ignoring message");
                }
            }
        }

        Ok(())
    }

    /// Map a data message and queue it for the publisher without waiting.
    fn dispatch(&self, message: &AlpacaMessage) -> Result<(), StreamClientError> {
        let Some(mapped) = adapter::to_event(message) else {
            return Ok(());
        };

        let event = match mapped {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping invalid feed message");
                metrics::record_event_dropped(DropReason::InvalidEvent);
                return Ok(());
            }
        };

        let kind = event.kind();
        match self.event_tx.try_send(event) {
            Ok(()) => {
                self.state.increment_forwarded();
                metrics::record_event_received(kind);
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    symbol = %event.symbol(),
                    kind = kind.as_str(),
                    "Publisher queue full, dropping event"
                );
                self.state.increment_dropped();
                metrics::record_event_dropped(DropReason::QueueFull);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(StreamClientError::PublisherClosed),
        }
    }
}

fn log_malformed(error: &CodecError) {
    tracing::warn!(error = %error, "Discarding malformed feed message");
    metrics::record_event_dropped(DropReason::Malformed);
}
