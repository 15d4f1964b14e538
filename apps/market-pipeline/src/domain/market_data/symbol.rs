//! Ticker symbol value object.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

const MAX_SYMBOL_LEN: usize = 21;

/// A stock ticker, normalized to uppercase.
///
/// Examples: "AAPL", "BRK.B", "BF-B".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol, trimming whitespace and uppercasing.
    ///
    /// # Errors
    ///
    /// Returns an error if the ticker is empty, too long, or contains
    /// characters other than ASCII letters, digits, `.`, `/` or `-`.
    pub fn new(value: impl AsRef<str>) -> Result<Self, DomainError> {
        let normalized = value.as_ref().trim().to_ascii_uppercase();

        if normalized.is_empty() {
            return Err(DomainError::invalid("symbol", "symbol cannot be empty"));
        }
        if normalized.len() > MAX_SYMBOL_LEN {
            return Err(DomainError::invalid(
                "symbol",
                format!("symbol exceeds {MAX_SYMBOL_LEN} characters: {normalized}"),
            ));
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '/' | '-'))
        {
            return Err(DomainError::invalid(
                "symbol",
                format!("symbol contains invalid characters: {normalized}"),
            ));
        }

        Ok(Self(normalized))
    }

    /// Get the symbol string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("aapl", "AAPL")]
    #[test_case("  msft ", "MSFT")]
    #[test_case("brk.b", "BRK.B")]
    #[test_case("BF-B", "BF-B")]
    fn normalizes_to_uppercase(input: &str, expected: &str) {
        assert_eq!(Symbol::new(input).unwrap().as_str(), expected);
    }

    #[test_case("")]
    #[test_case("   ")]
    #[test_case("AA PL")]
    #[test_case("AAPL;DROP")]
    #[test_case("ABCDEFGHIJKLMNOPQRSTUVWXYZ")]
    fn rejects_invalid(input: &str) {
        assert!(Symbol::new(input).is_err());
    }

    #[test]
    fn serde_round_trip_is_plain_string() {
        let symbol = Symbol::new("tsla").unwrap();
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(json, "\"TSLA\"");

        let parsed: Symbol = serde_json::from_str("\"nvda\"").unwrap();
        assert_eq!(parsed.as_str(), "NVDA");
    }

    #[test]
    fn deserialize_rejects_empty() {
        assert!(serde_json::from_str::<Symbol>("\"\"").is_err());
    }
}
