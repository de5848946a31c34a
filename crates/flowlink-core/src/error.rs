// ── Core error types ──
//
// User-facing errors from flowlink-core. Resolution failures are a
// distinct kind from transport failures so callers can tell "no such
// child" apart from "solver unreachable". The `From<flowlink_api::Error>`
// impl translates wire-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Resolution errors ────────────────────────────────────────────
    /// A child, key, or command name did not resolve against the current
    /// schema snapshot. Carries the attempted name and the wire path at
    /// which resolution failed — without these, debugging a deep
    /// dynamically-resolved chain is hopeless.
    #[error("'{name}' not found at path '{path}'")]
    NotFound { name: String, path: String },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to solver at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Session is disconnected")]
    Disconnected,

    #[error("Solver connection timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Solver errors (wrapped, not exposed raw) ─────────────────────
    #[error("Solver error: {message}")]
    Solver {
        message: String,
        /// Solver-specific error code (e.g. "se.path.invalid").
        code: Option<String>,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build a resolution error for `name` at `path`.
    pub fn not_found(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::NotFound {
            name: name.into(),
            path: path.into(),
        }
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<flowlink_api::Error> for CoreError {
    fn from(err: flowlink_api::Error) -> Self {
        match err {
            flowlink_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            flowlink_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map(|u| u.to_string())
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Solver {
                        message: e.to_string(),
                        code: None,
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            flowlink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            flowlink_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            flowlink_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            flowlink_api::Error::Solver { message, code, status } => CoreError::Solver {
                message,
                code,
                status: Some(status),
            },
            flowlink_api::Error::StreamConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("event stream connection failed: {reason}"),
            },
            flowlink_api::Error::StreamClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("event stream closed (code {code}): {reason}"),
            },
            flowlink_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("deserialization error: {message}"))
            }
        }
    }
}
