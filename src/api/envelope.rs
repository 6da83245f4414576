//! Response Envelope
//!
//! Every Control API call answers with `{success, message, data?}`.
//! Errors never escape as `Err`; they become `success: false` envelopes
//! whose message is the error's display text.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn from_error(error: &EngineError) -> Self {
        Self::failure(error.to_string())
    }

    /// Wraps a result, building the success message from the value.
    pub fn from_result<F>(result: Result<T>, message: F) -> Self
    where
        F: FnOnce(&T) -> String,
    {
        match result {
            Ok(data) => {
                let message = message(&data);
                Self::ok(message, data)
            }
            Err(e) => Self::from_error(&e),
        }
    }

    /// A partially successful batch still carries its per-item data.
    pub fn with_outcome(success: bool, message: impl Into<String>, data: T) -> Self {
        Self {
            success,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }
}
