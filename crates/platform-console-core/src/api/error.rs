use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Server error {status}: {message}")]
    ServerFault { status: u16, message: String },

    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    MalformedResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Session storage error: {0}")]
    Storage(String),
}

/// Failure of the credential refresh procedure. Always terminal for the
/// current refresh cycle.
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("No refresh credential available")]
    MissingCredential,

    #[error("A credential refresh is already in progress")]
    InProgress,

    #[error("Refresh request failed: {0}")]
    Request(#[source] ApiError),

    #[error("Refresh response did not contain an access credential")]
    MissingAccess,

    #[error("Refresh task ended unexpectedly")]
    Aborted,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    pub(crate) fn storage(err: anyhow::Error) -> Self {
        ApiError::Storage(format!("{:#}", err))
    }

    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Pull the server-supplied message out of an error body.
    ///
    /// The backend answers with `{"message": ..}` or, for framework-generated
    /// errors, `{"detail": ..}`. Anything else falls back to the raw body.
    fn server_message(body: &str) -> String {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
            for key in ["message", "detail"] {
                if let Some(Value::String(msg)) = map.get(key) {
                    return Self::truncate_body(msg);
                }
            }
        }
        Self::truncate_body(body)
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::server_message(body);
        match status.as_u16() {
            400 => ApiError::BadRequest(message),
            401 => ApiError::Unauthenticated(message),
            403 => ApiError::Forbidden(message),
            404 => ApiError::NotFound(message),
            code @ 500..=599 => ApiError::ServerFault { status: code, message },
            code => ApiError::Status { status: code, message },
        }
    }

    /// HTTP status carried by this error, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::BadRequest(_) => Some(400),
            ApiError::Unauthenticated(_) => Some(401),
            ApiError::Forbidden(_) => Some(403),
            ApiError::NotFound(_) => Some(404),
            ApiError::ServerFault { status, .. } | ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            ApiError::MalformedResponse(_) | ApiError::InvalidRequest(_) | ApiError::Storage(_) => None,
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, ApiError::Unauthenticated(_))
    }

    /// Human-readable notification text, categorized by status code.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Transport(e) if e.is_timeout() => {
                "The server did not respond in time, please try again".to_string()
            }
            ApiError::Transport(_) => {
                "Network error, please check the connection or server status".to_string()
            }
            ApiError::BadRequest(msg) if !msg.is_empty() => msg.clone(),
            ApiError::BadRequest(_) => "Invalid request parameters".to_string(),
            ApiError::Unauthenticated(_) => "Session expired, please log in again".to_string(),
            ApiError::Forbidden(_) => "You do not have permission to perform this action".to_string(),
            ApiError::NotFound(_) => "The requested resource does not exist".to_string(),
            ApiError::ServerFault { .. } => {
                "Internal server error, please contact the administrator".to_string()
            }
            ApiError::Status { status, message } if message.is_empty() => {
                format!("Request failed ({})", status)
            }
            ApiError::Status { message, .. } => message.clone(),
            ApiError::MalformedResponse(_) => "Unexpected response from the server".to_string(),
            ApiError::InvalidRequest(msg) => format!("Request error: {}", msg),
            ApiError::Storage(_) => "Could not save the login session locally".to_string(),
        }
    }
}
