//! Redis stream fan-out.
//!
//! Appends each persisted event to a capped stream:
//!
//! ```text
//! XADD market:realtime:trades MAXLEN ~ 10000 * symbol AAPL data {...}
//! ```
//!
//! Delivery is best effort. The connection manager reconnects on its own;
//! callers only log failures.

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::application::ports::{FanoutError, FanoutPublisher};
use crate::domain::market_data::{Bar, Trade};

/// Stream receiving trades.
pub const TRADES_STREAM: &str = "market:realtime:trades";

/// Stream receiving bars.
pub const BARS_STREAM: &str = "market:realtime:bars";

/// Default approximate stream length cap.
pub const DEFAULT_STREAM_MAXLEN: usize = 10_000;

/// Build an `XADD` with approximate trimming.
#[must_use]
pub fn xadd_command(stream: &str, maxlen: usize, symbol: &str, data: &[u8]) -> redis::Cmd {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream)
        .arg("MAXLEN")
        .arg("~")
        .arg(maxlen)
        .arg("*")
        .arg("symbol")
        .arg(symbol)
        .arg("data")
        .arg(data);
    cmd
}

/// [`FanoutPublisher`] writing to Redis streams.
#[derive(Clone)]
pub struct RedisFanout {
    connection: ConnectionManager,
    maxlen: usize,
}

impl RedisFanout {
    /// Connect to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the first connection fails.
    pub async fn connect(url: &str, maxlen: usize) -> Result<Self, FanoutError> {
        let client = redis::Client::open(url).map_err(|e| FanoutError::Connection {
            message: e.to_string(),
        })?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| FanoutError::Connection {
                message: e.to_string(),
            })?;

        tracing::info!(maxlen, "Redis fan-out connected");
        Ok(Self { connection, maxlen })
    }

    async fn append(&self, stream: &str, symbol: &str, data: &[u8]) -> Result<(), FanoutError> {
        let mut connection = self.connection.clone();
        xadd_command(stream, self.maxlen, symbol, data)
            .query_async::<String>(&mut connection)
            .await
            .map(|_id| ())
            .map_err(|e| FanoutError::PublishFailed {
                message: format!("{stream}: {e}"),
            })
    }
}

impl std::fmt::Debug for RedisFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisFanout")
            .field("maxlen", &self.maxlen)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FanoutPublisher for RedisFanout {
    async fn publish_trade(&self, trade: &Trade) -> Result<(), FanoutError> {
        let data = serde_json::to_vec(trade).map_err(|e| FanoutError::Serialization {
            message: e.to_string(),
        })?;
        self.append(TRADES_STREAM, trade.symbol.as_str(), &data).await
    }

    async fn publish_bar(&self, bar: &Bar) -> Result<(), FanoutError> {
        let data = serde_json::to_vec(bar).map_err(|e| FanoutError::Serialization {
            message: e.to_string(),
        })?;
        self.append(BARS_STREAM, bar.symbol.as_str(), &data).await
    }
}
