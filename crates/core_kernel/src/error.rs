//! Errors raised by the kernel's value types

use thiserror::Error;
use crate::quantity::QuantityError;

/// Failure to build a kernel value from external input
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Quantity error: {0}")]
    Quantity(#[from] QuantityError),

    #[error("Invalid {kind} identifier '{value}'")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        #[source]
        source: uuid::Error,
    },
}

impl CoreError {
    pub fn invalid_identifier(kind: &'static str, value: impl Into<String>, source: uuid::Error) -> Self {
        CoreError::InvalidIdentifier {
            kind,
            value: value.into(),
            source,
        }
    }
}
