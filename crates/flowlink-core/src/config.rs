// ── Runtime connection configuration ──
//
// These types describe *how* to reach a solver instance. They carry
// credential data and connection tuning, but never touch disk — the
// config crate (or the embedding application) builds a `SessionConfig`
// and hands it in.

use secrecy::SecretString;
use url::Url;

/// How to authenticate with the solver service.
#[derive(Debug, Clone, Default)]
pub enum SessionAuth {
    /// No authentication (solver launched locally, loopback only).
    #[default]
    None,
    /// Session token attached to every request and the event stream.
    Token(SecretString),
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default)]
pub enum TlsVerification {
    /// System CA store (strict).
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification. Default — containerized solvers self-sign.
    #[default]
    DangerAcceptInvalid,
}

impl PartialEq for TlsVerification {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::SystemDefaults, Self::SystemDefaults) => true,
            (Self::CustomCa(a), Self::CustomCa(b)) => a == b,
            (Self::DangerAcceptInvalid, Self::DangerAcceptInvalid) => true,
            _ => false,
        }
    }
}

impl Eq for TlsVerification {}

/// Configuration for connecting to a single solver instance.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Solver service URL (e.g. `https://solver-host:63084`).
    pub url: Url,
    /// Authentication method and credentials.
    pub auth: SessionAuth,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: std::time::Duration,
    /// Open the datamodel event stream on connect.
    pub events_enabled: bool,
    /// Suppress command events on the stream (diff-state only).
    pub no_commands_diff_state: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "https://127.0.0.1:63084"
                .parse()
                .expect("default solver url is valid"),
            auth: SessionAuth::None,
            tls: TlsVerification::default(),
            timeout: std::time::Duration::from_secs(30),
            events_enabled: true,
            no_commands_diff_state: false,
        }
    }
}
