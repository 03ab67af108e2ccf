use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy for every outbound call.
///
/// Transport errors are classified at the client boundary; callers never see
/// a raw `reqwest::Error`. Each variant carries enough context to render a
/// user-facing message without inspecting the originating error.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Caller-correctable input problem, rejected before any network call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No response within the per-call wall-clock budget.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The service replied with a non-2xx status.
    #[error("server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Transport-level failure before a response arrived.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The payload did not decode as the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The extraction endpoint returned a blank result.
    #[error("extraction returned no text")]
    EmptyExtraction,
}

impl ApiError {
    /// Classify a `reqwest` failure into the taxonomy.
    ///
    /// `budget` is the wall-clock timeout that was applied to the call, so a
    /// timeout expiry stays distinguishable from a server-returned error.
    pub fn from_transport(err: reqwest::Error, budget: Duration) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(budget)
        } else if err.is_connect() {
            ApiError::NetworkUnreachable(err.to_string())
        } else if err.is_decode() {
            ApiError::MalformedResponse(err.to_string())
        } else {
            ApiError::NetworkUnreachable(err.to_string())
        }
    }

    /// Message suitable for direct display to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::InvalidInput(reason) => format!("Invalid input: {reason}"),
            ApiError::Timeout(_) => {
                "The request timed out. Please try again.".to_string()
            }
            ApiError::ServerError { status, message } => {
                format!("The service returned an error ({status}): {message}")
            }
            ApiError::NetworkUnreachable(_) => {
                "Could not reach the analysis service. Check your network connection."
                    .to_string()
            }
            ApiError::MalformedResponse(_) => {
                "The service returned an unexpected response.".to_string()
            }
            ApiError::EmptyExtraction => {
                "No text could be extracted from that file.".to_string()
            }
        }
    }

    /// Whether retrying the same call unchanged could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout(_) | ApiError::NetworkUnreachable(_)
        )
    }
}
