//! Stream Codec
//!
//! Decodes JSON text frames from the stock stream. Frames are usually a
//! JSON array of message objects; a bare object is accepted too. A bad
//! element is reported in [`DecodedFrame::rejected`] without discarding
//! the rest of the frame.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::messages::{
    AlpacaMessage, BarKind, ErrorMessage, StockTradeMessage, SubscriptionMessage, SuccessMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is neither an array nor an object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// Element has no `T` discriminator.
    #[error("message without type discriminator")]
    MissingType,

    /// Element of a known type failed to decode.
    #[error("malformed '{msg_type}' message: {source}")]
    Malformed {
        /// The `T` value.
        msg_type: String,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// Result of decoding one text frame.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    /// Successfully decoded messages, in frame order.
    pub messages: Vec<AlpacaMessage>,
    /// Elements that could not be decoded.
    pub rejected: Vec<CodecError>,
}

/// JSON codec for the stock stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON or not an
    /// array/object. Per-element failures are reported in the frame.
    pub fn decode(&self, text: &str) -> Result<DecodedFrame, CodecError> {
        let value: Value = serde_json::from_str(text.trim())?;

        let elements = match value {
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            other => {
                let preview: String = other.to_string().chars().take(50).collect();
                return Err(CodecError::InvalidFormat(format!(
                    "expected JSON array or object, got: {preview}"
                )));
            }
        };

        let mut frame = DecodedFrame {
            messages: Vec::with_capacity(elements.len()),
            rejected: Vec::new(),
        };
        for element in elements {
            match Self::decode_value(element) {
                Ok(message) => frame.messages.push(message),
                Err(e) => frame.rejected.push(e),
            }
        }

        Ok(frame)
    }

    /// Decode one message object by its `T` field.
    fn decode_value(value: Value) -> Result<AlpacaMessage, CodecError> {
        let msg_type = value
            .get("T")
            .and_then(Value::as_str)
            .ok_or(CodecError::MissingType)?
            .to_string();

        let message = match msg_type.as_str() {
            "success" => AlpacaMessage::Success(parse::<SuccessMessage>(&msg_type, value)?),
            "error" => AlpacaMessage::Error(parse::<ErrorMessage>(&msg_type, value)?),
            "subscription" => {
                AlpacaMessage::Subscription(parse::<SubscriptionMessage>(&msg_type, value)?)
            }
            "t" => AlpacaMessage::Trade(parse::<StockTradeMessage>(&msg_type, value)?),
            "b" => AlpacaMessage::Bar(BarKind::Minute, parse(&msg_type, value)?),
            "u" => AlpacaMessage::Bar(BarKind::Updated, parse(&msg_type, value)?),
            "d" => AlpacaMessage::Bar(BarKind::Daily, parse(&msg_type, value)?),
            _ => AlpacaMessage::Unrecognized(msg_type),
        };

        Ok(message)
    }

    /// Encode a value to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}

fn parse<T: DeserializeOwned>(msg_type: &str, value: Value) -> Result<T, CodecError> {
    serde_json::from_value(value).map_err(|source| CodecError::Malformed {
        msg_type: msg_type.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::alpaca::messages::{SuccessKind, WireTimestamp};

    #[test]
    fn decodes_control_array() {
        let frame = JsonCodec::new()
            .decode(r#"[{"T":"success","msg":"connected"}]"#)
            .unwrap();

        assert_eq!(frame.messages.len(), 1);
        assert!(matches!(
            &frame.messages[0],
            AlpacaMessage::Success(s) if s.msg == SuccessKind::Connected
        ));
    }

    #[test]
    fn decodes_single_object() {
        let frame = JsonCodec::new()
            .decode(r#"{"T":"error","code":402,"msg":"auth failed"}"#)
            .unwrap();

        assert!(matches!(&frame.messages[0], AlpacaMessage::Error(e) if e.code == 402));
    }

    #[test]
    fn decodes_mixed_data_frame() {
        let text = r#"[
            {"T":"t","S":"AAPL","i":1,"x":"V","p":150.25,"s":100,"t":"2024-01-02T14:30:00.123Z","c":["@"],"z":"C"},
            {"T":"q","S":"AAPL","bp":150.2,"ap":150.3},
            {"T":"b","S":"AAPL","o":150,"h":151,"l":149,"c":150.5,"v":1000,"n":10,"vw":150.2,"t":"2024-01-02T14:30:00Z"},
            {"T":"u","S":"AAPL","o":150,"h":151,"l":149,"c":150.6,"v":1001,"n":11,"vw":150.2,"t":"2024-01-02T14:30:00Z"},
            {"T":"d","S":"AAPL","o":150,"h":155,"l":148,"c":152,"v":90000,"t":"2024-01-02T05:00:00Z"}
        ]"#;

        let frame = JsonCodec::new().decode(text).unwrap();

        assert!(frame.rejected.is_empty());
        assert_eq!(frame.messages.len(), 5);
        assert!(matches!(frame.messages[0], AlpacaMessage::Trade(_)));
        assert_eq!(frame.messages[1], AlpacaMessage::Unrecognized("q".to_string()));
        assert!(matches!(frame.messages[2], AlpacaMessage::Bar(BarKind::Minute, _)));
        assert!(matches!(frame.messages[3], AlpacaMessage::Bar(BarKind::Updated, _)));
        assert!(matches!(frame.messages[4], AlpacaMessage::Bar(BarKind::Daily, _)));
    }

    #[test]
    fn integer_timestamp_trade() {
        let frame = JsonCodec::new()
            .decode(r#"[{"T":"t","S":"AAPL","p":150.25,"s":100,"t":1700000000000}]"#)
            .unwrap();

        let AlpacaMessage::Trade(trade) = &frame.messages[0] else {
            panic!("expected trade");
        };
        assert_eq!(trade.timestamp, WireTimestamp::Epoch(1_700_000_000_000));
    }

    #[test]
    fn malformed_element_does_not_drop_frame() {
        let frame = JsonCodec::new()
            .decode(r#"[{"T":"t","S":"AAPL"},{"T":"success","msg":"authenticated"}]"#)
            .unwrap();

        assert_eq!(frame.messages.len(), 1);
        assert_eq!(frame.rejected.len(), 1);
        assert!(matches!(
            &frame.rejected[0],
            CodecError::Malformed { msg_type, .. } if msg_type == "t"
        ));
    }

    #[test]
    fn missing_discriminator_is_rejected() {
        let frame = JsonCodec::new().decode(r#"[{"S":"AAPL"}]"#).unwrap();
        assert!(matches!(frame.rejected[0], CodecError::MissingType));
    }

    #[test]
    fn empty_array() {
        let frame = JsonCodec::new().decode("[]").unwrap();
        assert!(frame.messages.is_empty());
    }

    #[test]
    fn invalid_json_fails_whole_frame() {
        assert!(JsonCodec::new().decode("not json").is_err());
        assert!(matches!(
            JsonCodec::new().decode("42"),
            Err(CodecError::InvalidFormat(_))
        ));
    }
}
