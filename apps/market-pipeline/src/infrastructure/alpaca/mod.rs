//! Alpaca Market Data Stream
//!
//! WebSocket client for the Alpaca stock data stream (trades and bars).
//!
//! # Modules
//!
//! - [`messages`]: wire message types
//! - [`codec`]: JSON frame decoding
//! - [`auth`]: credentials and handshake errors
//! - [`session`]: handshake state machine
//! - [`heartbeat`]: ping/pong liveness
//! - [`adapter`]: wire message to canonical event mapping
//! - [`feed_state`]: connection state for health reporting
//! - [`client`]: connection supervisor

pub mod adapter;
pub mod auth;
pub mod client;
pub mod codec;
pub mod feed_state;
pub mod heartbeat;
pub mod messages;
pub mod session;

pub use auth::{AuthError, Credentials};
pub use client::{DEFAULT_STREAM_URL, StreamClient, StreamClientConfig, StreamClientError};
pub use feed_state::{ConnectionState, FeedState};
pub use heartbeat::HeartbeatConfig;
pub use session::SessionState;
