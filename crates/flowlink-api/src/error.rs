use thiserror::Error;

/// Top-level error type for the `flowlink-api` crate.
///
/// Covers every failure mode across the wire surfaces: transport,
/// the datamodel RPC endpoints, and the event WebSocket.
/// `flowlink-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The solver rejected the session token.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Datamodel service ───────────────────────────────────────────
    /// Structured error returned by the solver's datamodel service.
    #[error("Solver error (HTTP {status}): {message}")]
    Solver {
        message: String,
        code: Option<String>,
        status: u16,
    },

    // ── Event stream ────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("Event stream connection failed: {0}")]
    StreamConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("Event stream closed (code {code}): {reason}")]
    StreamClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    ///
    /// The datamodel layer itself never retries; this exists for wrapping
    /// policy layers that do.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::StreamConnect(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Solver { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Extract the solver error code, if available.
    pub fn solver_error_code(&self) -> Option<&str> {
        match self {
            Self::Solver { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
