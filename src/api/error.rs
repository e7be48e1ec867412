//! REST errors and the single message a user gets to see for them

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shown when neither the server nor the transport gave anything readable
pub const GENERIC_MESSAGE: &str = "Request failed";

/// Error body of the inventory backend (`ExceptionResponse`)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerError {
    pub status: Option<u16>,
    pub error: Option<String>,
    pub message: Option<String>,
    pub path: Option<String>,
    pub details: Vec<FieldError>,
}

/// Per-field validation problem reported by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldError {
    pub index: Option<u32>,
    pub field_path: Option<String>,
    pub message: Option<String>,
}

/// Failure of a REST call
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server answered with a non-success status
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// The request never produced a response
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A success response whose body was not the expected JSON
    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Build from a non-success response body.
    ///
    /// Priority: structured body `message`, then its `error`, then a plain
    /// string body, then a generic message with the status code.
    pub fn from_response(status: u16, body: &str) -> Self {
        ApiError::Server {
            status,
            message: extract_message(body)
                .unwrap_or_else(|| format!("{} (HTTP {})", GENERIC_MESSAGE, status)),
        }
    }

    /// The message a view shows in its toast.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Server { message, .. } => message.clone(),
            ApiError::Transport(e) if e.is_timeout() => format!("{}: timed out", GENERIC_MESSAGE),
            ApiError::Transport(e) => format!("{}: {}", GENERIC_MESSAGE, e),
            ApiError::Decode(_) | ApiError::InvalidUrl(_) => GENERIC_MESSAGE.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(_)) => {
            let parsed: ServerError = serde_json::from_str(trimmed).unwrap_or_default();
            parsed
                .message
                .filter(|m| !m.trim().is_empty())
                .or(parsed.error.filter(|e| !e.trim().is_empty()))
        }
        Ok(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Ok(_) => None,
        Err(_) => Some(trimmed.to_string()),
    }
}
