//! Domain errors.

/// Errors raised while constructing or validating domain values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Invalid value for a field.
    #[error("invalid {field}: {message}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Error message.
        message: String,
    },

    /// Timestamp could not be normalized to epoch nanoseconds.
    #[error("invalid timestamp {raw}: {reason}")]
    InvalidTimestamp {
        /// Raw value as received.
        raw: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl DomainError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}
