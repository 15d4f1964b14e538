//! Feed Adapter
//!
//! Maps decoded wire messages to canonical [`Trade`] and [`Bar`] events.
//! Stateless. This is the only place where feed timestamps are
//! normalized; see [`EpochNanos`] for the unit rules.

use rust_decimal::Decimal;

use super::messages::{AlpacaMessage, BarKind, StockBarMessage, StockTradeMessage, WireTimestamp};
use crate::domain::DomainError;
use crate::domain::market_data::{Bar, EpochNanos, MarketEvent, Symbol, Timeframe, Trade};

/// Map a data message to an event. Returns `None` for control messages.
#[must_use]
pub fn to_event(message: &AlpacaMessage) -> Option<Result<MarketEvent, DomainError>> {
    match message {
        AlpacaMessage::Trade(trade) => Some(trade_from_wire(trade).map(MarketEvent::Trade)),
        AlpacaMessage::Bar(kind, bar) => Some(bar_from_wire(*kind, bar).map(MarketEvent::Bar)),
        _ => None,
    }
}

/// Map a trade message.
///
/// # Errors
///
/// Returns an error for an invalid symbol, a non-positive price, a
/// negative size, or a timestamp that cannot be normalized.
pub fn trade_from_wire(msg: &StockTradeMessage) -> Result<Trade, DomainError> {
    if msg.price <= Decimal::ZERO {
        return Err(DomainError::InvalidValue {
            field: "price",
            message: format!("trade price must be positive, got {}", msg.price),
        });
    }
    if msg.size < Decimal::ZERO {
        return Err(DomainError::InvalidValue {
            field: "size",
            message: format!("trade size cannot be negative, got {}", msg.size),
        });
    }

    Ok(Trade {
        symbol: Symbol::new(&msg.symbol)?,
        price: msg.price,
        size: msg.size,
        timestamp: normalize_timestamp(&msg.timestamp)?,
        exchange: msg.exchange.clone().unwrap_or_default(),
        conditions: msg.conditions.clone(),
    })
}

/// Map a bar message. `b` and `u` are minute bars; `d` is daily.
///
/// # Errors
///
/// Returns an error for an invalid symbol, negative volume, or a
/// timestamp that cannot be normalized.
pub fn bar_from_wire(kind: BarKind, msg: &StockBarMessage) -> Result<Bar, DomainError> {
    if msg.volume < 0 {
        return Err(DomainError::InvalidValue {
            field: "volume",
            message: format!("bar volume cannot be negative, got {}", msg.volume),
        });
    }

    let timeframe = match kind {
        BarKind::Minute | BarKind::Updated => Timeframe::Minute,
        BarKind::Daily => Timeframe::Day,
    };

    Ok(Bar {
        symbol: Symbol::new(&msg.symbol)?,
        timeframe,
        open: msg.open,
        high: msg.high,
        low: msg.low,
        close: msg.close,
        volume: msg.volume,
        trade_count: msg.trade_count,
        vwap: msg.vwap,
        timestamp: normalize_timestamp(&msg.timestamp)?,
    })
}

fn normalize_timestamp(raw: &WireTimestamp) -> Result<EpochNanos, DomainError> {
    match raw {
        WireTimestamp::Epoch(value) => EpochNanos::from_epoch(*value),
        WireTimestamp::Text(text) => EpochNanos::parse_rfc3339(text),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::infrastructure::alpaca::codec::JsonCodec;

    fn decode(json: &str) -> AlpacaMessage {
        JsonCodec::new().decode(json).unwrap().messages.remove(0)
    }

    #[test]
    fn trade_with_millisecond_epoch() {
        let msg = decode(r#"{"T":"t","S":"aapl","p":150.25,"s":100,"t":1700000000000}"#);

        let Some(Ok(MarketEvent::Trade(trade))) = to_event(&msg) else {
            panic!("expected trade");
        };
        assert_eq!(trade.symbol.as_str(), "AAPL");
        assert_eq!(trade.price, dec!(150.25));
        assert_eq!(trade.size, dec!(100));
        assert_eq!(trade.timestamp.as_nanos(), 1_700_000_000_000_000_000);
        assert_eq!(trade.exchange, "");
    }

    #[test]
    fn trade_with_rfc3339() {
        let msg = decode(
            r#"{"T":"t","S":"AAPL","x":"V","p":126.55,"s":1,"t":"2021-02-22T15:51:44.208Z","c":["@","I"]}"#,
        );

        let Some(Ok(MarketEvent::Trade(trade))) = to_event(&msg) else {
            panic!("expected trade");
        };
        assert_eq!(trade.timestamp.as_millis(), 1_614_009_104_208);
        assert_eq!(trade.exchange, "V");
        assert_eq!(trade.conditions, vec!["@", "I"]);
    }

    #[test]
    fn bar_kinds_map_to_timeframes() {
        let body = r#""S":"SPY","o":1,"h":2,"l":0.5,"c":1.5,"v":10,"n":3,"vw":1.2,"t":"2021-02-22T19:15:00Z"}"#;

        for (tag, expected) in [
            ("b", Timeframe::Minute),
            ("u", Timeframe::Minute),
            ("d", Timeframe::Day),
        ] {
            let msg = decode(&format!(r#"{{"T":"{tag}",{body}"#));
            let Some(Ok(MarketEvent::Bar(bar))) = to_event(&msg) else {
                panic!("expected bar for {tag}");
            };
            assert_eq!(bar.timeframe, expected, "tag {tag}");
            assert_eq!(bar.vwap, Some(dec!(1.2)));
            assert_eq!(bar.trade_count, 3);
        }
    }

    #[test]
    fn rejects_non_positive_timestamp() {
        let msg = decode(r#"{"T":"t","S":"AAPL","p":1,"s":1,"t":0}"#);
        assert!(matches!(
            to_event(&msg),
            Some(Err(DomainError::InvalidTimestamp { .. }))
        ));
    }

    #[test]
    fn rejects_non_positive_price() {
        let msg = decode(r#"{"T":"t","S":"AAPL","p":0,"s":1,"t":1700000000000}"#);
        assert!(matches!(to_event(&msg), Some(Err(_))));
    }

    #[test]
    fn control_messages_are_not_events() {
        let msg = decode(r#"{"T":"success","msg":"authenticated"}"#);
        assert!(to_event(&msg).is_none());
    }
}
