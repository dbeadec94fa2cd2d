//! Error taxonomy shared by the agent and the HTTP layer
//!
//! Every failure that reaches a client carries a machine-readable kind code
//! next to the human message.

use serde::Serialize;
use thiserror::Error;

/// Tagged application error.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad or missing user input (key, file, message, model name).
    #[error("{0}")]
    Validation(String),

    /// The uploaded bytes could not be turned into a table.
    #[error("{0}")]
    Decode(String),

    /// The LLM provider could not be constructed or rejected a request.
    #[error("{0}")]
    Provider(String),

    /// The reasoning loop or one of its tools failed.
    #[error("{0}")]
    Execution(String),
}

/// Kind code serialized into JSON error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Validation,
    Decode,
    Provider,
    Execution,
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Provider(_) => ErrorKind::Provider,
            Self::Execution(_) => ErrorKind::Execution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_lowercase() {
        let code = serde_json::to_value(AppError::decode("bad bytes").kind()).unwrap();
        assert_eq!(code, "decode");
    }

    #[test]
    fn message_is_shown_as_is() {
        assert_eq!(AppError::provider("boom").to_string(), "boom");
        assert_eq!(AppError::execution("x").kind(), ErrorKind::Execution);
    }
}
