use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Unknown relation `{relation}` on collection `{collection}`")]
    UnknownRelation { collection: String, relation: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(
        "One-to-one relation `{relation}` on `{collection}` matched {matches} rows for a single parent"
    )]
    AmbiguousOneToOne {
        collection: String,
        relation: String,
        matches: usize,
    },

    #[error("Invalid option `{option}`: {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("Query depth exceeds configured maximum of {max}")]
    DepthExceeded { max: usize },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl Error {
    pub(crate) fn invalid_option(option: &str, reason: impl Display) -> Self {
        Error::InvalidOption {
            option: option.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Error reported by the remote channel, carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub error: String,
    pub reason: Option<String>,
    pub details: Option<Value>,
}

impl RemoteError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: None,
            details: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} [{}]", reason, self.error),
            None => write!(f, "[{}]", self.error),
        }
    }
}

impl std::error::Error for RemoteError {}
