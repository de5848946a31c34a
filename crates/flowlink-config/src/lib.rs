//! Shared configuration for FlowLink tools.
//!
//! TOML profiles, credential resolution (keyring + env + plaintext),
//! and translation to `flowlink_core::SessionConfig`. Embedding
//! applications depend on this crate for everything that touches disk;
//! the core crates stay profile-agnostic.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flowlink_core::{SessionAuth, SessionConfig, TlsVerification};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no session token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named solver profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_events")]
    pub events: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            insecure: false,
            timeout: default_timeout(),
            events: default_events(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_events() -> bool {
    true
}

/// A named solver profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Solver service base URL (e.g., "https://solver-host:63084").
    pub solver: String,

    /// Session token (plaintext — prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the session token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,

    /// Override event-stream setting.
    pub events: Option<bool>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("rs", "flowlink", "flowlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("flowlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = config_path();

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("FLOWLINK_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a session token from the credential chain:
/// profile env var → system keyring → plaintext in config.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Ok(entry) = keyring::Entry::new("flowlink", &format!("{profile_name}/token")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Resolve `SessionAuth` from a profile. A profile with no token source
/// at all means an unauthenticated local solver, not an error.
pub fn resolve_auth(profile: &Profile, profile_name: &str) -> Result<SessionAuth, ConfigError> {
    if profile.token.is_none() && profile.token_env.is_none() {
        // Still honor a keyring entry if one was stored for this profile.
        if let Ok(entry) = keyring::Entry::new("flowlink", &format!("{profile_name}/token")) {
            if let Ok(secret) = entry.get_password() {
                return Ok(SessionAuth::Token(SecretString::from(secret)));
            }
        }
        return Ok(SessionAuth::None);
    }

    Ok(SessionAuth::Token(resolve_token(profile, profile_name)?))
}

// ── Profile translation ─────────────────────────────────────────────

/// Build a `SessionConfig` from a profile plus global defaults.
pub fn profile_to_session_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    let url: url::Url = profile.solver.parse().map_err(|_| ConfigError::Validation {
        field: "solver".into(),
        reason: format!("invalid URL: {}", profile.solver),
    })?;

    let auth = resolve_auth(profile, profile_name)?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::DangerAcceptInvalid // containerized solvers self-sign
    };

    let timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));

    Ok(SessionConfig {
        url,
        auth,
        tls,
        timeout,
        events_enabled: profile.events.unwrap_or(defaults.events),
        no_commands_diff_state: false,
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn profile(solver: &str) -> Profile {
        Profile {
            solver: solver.into(),
            ..Profile::default()
        }
    }

    #[test]
    fn toml_round_trip_preserves_profiles() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "lab".into(),
            Profile {
                solver: "https://solver-host:63084".into(),
                token_env: Some("FLOWLINK_LAB_TOKEN".into()),
                timeout: Some(60),
                ..Profile::default()
            },
        );

        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        let lab = &parsed.profiles["lab"];
        assert_eq!(lab.solver, "https://solver-host:63084");
        assert_eq!(lab.token_env.as_deref(), Some("FLOWLINK_LAB_TOKEN"));
        assert_eq!(lab.timeout, Some(60));
        assert_eq!(parsed.default_profile.as_deref(), Some("default"));
    }

    #[test]
    fn profile_overrides_win_over_defaults() {
        let mut p = profile("https://solver-host:63084");
        p.timeout = Some(5);
        p.events = Some(false);

        let cfg = profile_to_session_config(&p, "test", &Defaults::default()).unwrap();
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert!(!cfg.events_enabled);
        assert_eq!(cfg.url.as_str(), "https://solver-host:63084/");
    }

    #[test]
    fn defaults_fill_unset_profile_fields() {
        let cfg = profile_to_session_config(
            &profile("https://127.0.0.1:63084"),
            "test",
            &Defaults::default(),
        )
        .unwrap();
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert!(cfg.events_enabled);
        assert!(matches!(cfg.auth, SessionAuth::None));
    }

    #[test]
    fn ca_cert_selects_custom_ca_verification() {
        let mut p = profile("https://solver-host:63084");
        p.ca_cert = Some(PathBuf::from("/etc/flowlink/ca.pem"));
        p.insecure = Some(false);

        let cfg = profile_to_session_config(&p, "test", &Defaults::default()).unwrap();
        assert_eq!(
            cfg.tls,
            TlsVerification::CustomCa(PathBuf::from("/etc/flowlink/ca.pem"))
        );
    }

    #[test]
    fn invalid_solver_url_is_a_validation_error() {
        let err = profile_to_session_config(
            &profile("not a url"),
            "test",
            &Defaults::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn plaintext_token_resolves_last() {
        let mut p = profile("https://solver-host:63084");
        p.token = Some("abc123".into());

        let auth = resolve_auth(&p, "no-such-profile-for-keyring").unwrap();
        assert!(matches!(auth, SessionAuth::Token(_)));
    }
}
