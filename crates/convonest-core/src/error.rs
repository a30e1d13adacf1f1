//! Error taxonomy for forum operations.
//!
//! Gateway-level failures (`SessionExpired`, `ServerRejected`,
//! `NetworkUnavailable`) are raised by the request gateway after it has shown
//! a notice. Call-site failures (`ValidationFailed`, `UnauthenticatedAction`,
//! `AccessDenied`) are raised before any request is made.

use std::fmt;

use reqwest::StatusCode;
use serde_json::Value;

use crate::session::IdentityError;

/// Message shown when the backend rejects a request without saying why.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong";

/// Categories of errors, for logging and matching without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SessionExpired,
    ServerRejected,
    NetworkUnavailable,
    ValidationFailed,
    UnauthenticatedAction,
    AccessDenied,
    Cancelled,
    InvalidResponse,
    Identity,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::SessionExpired => write!(f, "session_expired"),
            ErrorKind::ServerRejected => write!(f, "server_rejected"),
            ErrorKind::NetworkUnavailable => write!(f, "network_unavailable"),
            ErrorKind::ValidationFailed => write!(f, "validation_failed"),
            ErrorKind::UnauthenticatedAction => write!(f, "unauthenticated_action"),
            ErrorKind::AccessDenied => write!(f, "access_denied"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::InvalidResponse => write!(f, "invalid_response"),
            ErrorKind::Identity => write!(f, "identity"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// 401 or 403 from the backend.
    #[error("Session expired (HTTP {status}). Please log in again.")]
    SessionExpired { status: u16 },

    /// Any other HTTP error status.
    #[error("HTTP {status}: {}", .message.as_deref().unwrap_or(GENERIC_ERROR_MESSAGE))]
    ServerRejected {
        status: u16,
        message: Option<String>,
    },

    /// No HTTP response: connection failure or timeout.
    #[error("Network error: {reason}")]
    NetworkUnavailable { reason: String },

    /// Local, pre-submission check failed.
    #[error("{field}: {message}")]
    ValidationFailed {
        field: &'static str,
        message: String,
    },

    /// Attempted an action that needs a signed-in principal.
    #[error("Login required: you must be logged in to {action}")]
    UnauthenticatedAction { action: &'static str },

    /// Signed in, but the account's role or quota forbids the action.
    #[error("{reason}")]
    AccessDenied { reason: String },

    /// The caller cancelled the request before it completed.
    #[error("Request cancelled")]
    Cancelled,

    /// A success response whose body could not be decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Sign-in, sign-up or token refresh failed at the identity provider.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::SessionExpired { .. } => ErrorKind::SessionExpired,
            ApiError::ServerRejected { .. } => ErrorKind::ServerRejected,
            ApiError::NetworkUnavailable { .. } => ErrorKind::NetworkUnavailable,
            ApiError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            ApiError::UnauthenticatedAction { .. } => ErrorKind::UnauthenticatedAction,
            ApiError::AccessDenied { .. } => ErrorKind::AccessDenied,
            ApiError::Cancelled => ErrorKind::Cancelled,
            ApiError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            ApiError::Identity(_) => ErrorKind::Identity,
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ApiError::ValidationFailed {
            field,
            message: message.into(),
        }
    }

    pub fn network(reason: impl Into<String>) -> Self {
        ApiError::NetworkUnavailable {
            reason: reason.into(),
        }
    }

    /// Classifies an HTTP error status and its body.
    ///
    /// The backend reports failures as `{ "message": "..." }`; anything else
    /// leaves the message empty so the generic text is used.
    pub fn from_status(status: StatusCode, body: &[u8]) -> Self {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return ApiError::SessionExpired {
                status: status.as_u16(),
            };
        }

        let message = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|json| {
                json.get("message")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|msg| !msg.is_empty())
                    .map(str::to_string)
            });

        ApiError::ServerRejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Result type for forum operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
