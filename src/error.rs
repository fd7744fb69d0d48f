use std::fmt;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Streaming services the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Spotify,
    Tidal,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Spotify => write!(f, "Spotify"),
            Service::Tidal => write!(f, "Tidal"),
        }
    }
}

/// Typed failures surfaced by the transfer engine.
///
/// Per-item failures (one track, one job) are captured into that item's
/// result. Only `Auth`, `Config` and a user cancellation abort a whole run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferError {
    #[error("{service} authentication required: {reason}")]
    Auth { service: Service, reason: String },

    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Track unavailable: {reason}")]
    PermanentTrack { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn auth(service: Service, reason: impl Into<String>) -> Self {
        Self::Auth {
            service,
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::PermanentTrack {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Only transient transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Errors that end the whole run instead of a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. } | Self::Config { .. } | Self::Cancelled
        )
    }

    /// Classify an HTTP status returned by `service` while doing `context`.
    pub fn from_status(service: Service, status: StatusCode, context: &str) -> Self {
        match status.as_u16() {
            401 => Self::auth(service, format!("{context}: session rejected ({status})")),
            404 => Self::not_found(context.to_string()),
            403 | 451 => Self::permanent(format!("{context}: {status}")),
            408 | 429 => Self::transport(format!("{context}: {status}")),
            s if s >= 500 => Self::transport(format!("{context}: {status}")),
            _ => Self::permanent(format!("{context}: unexpected status {status}")),
        }
    }

    /// Classify a `reqwest` failure. Status errors go through `from_status`,
    /// everything else (timeouts, resets, decode errors) is transient.
    pub fn from_reqwest(service: Service, err: reqwest::Error, context: &str) -> Self {
        match err.status() {
            Some(status) => Self::from_status(service, status, context),
            None => Self::transport(format!("{context}: {err}")),
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(format!("I/O error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(TransferError::transport("timeout").is_retryable());
        assert!(!TransferError::permanent("geo-restricted").is_retryable());
        assert!(!TransferError::not_found("playlist").is_retryable());
        assert!(!TransferError::auth(Service::Tidal, "expired").is_retryable());
        assert!(!TransferError::config("bad").is_retryable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(TransferError::auth(Service::Spotify, "expired").is_fatal());
        assert!(TransferError::config("min > max").is_fatal());
        assert!(TransferError::Cancelled.is_fatal());
        assert!(!TransferError::Cancelled.is_retryable());
        assert!(!TransferError::transport("reset").is_fatal());
        assert!(!TransferError::permanent("quota").is_fatal());
    }

    #[test]
    fn test_status_classification() {
        let classify = |code: u16| {
            TransferError::from_status(
                Service::Tidal,
                StatusCode::from_u16(code).unwrap(),
                "search",
            )
        };

        assert!(matches!(classify(401), TransferError::Auth { .. }));
        assert!(matches!(classify(404), TransferError::NotFound { .. }));
        assert!(matches!(classify(403), TransferError::PermanentTrack { .. }));
        assert!(matches!(classify(429), TransferError::Transport { .. }));
        assert!(matches!(classify(503), TransferError::Transport { .. }));
        assert!(matches!(classify(400), TransferError::PermanentTrack { .. }));
    }

    #[test]
    fn test_auth_message_names_service() {
        let err = TransferError::auth(Service::Tidal, "token expired");
        assert_eq!(err.to_string(), "Tidal authentication required: token expired");
    }
}
