//! Application configuration.
//!
//! Two layers:
//! - [`ForwardPolicy`]: what to forward and where, read from environment
//!   variables once at startup.
//! - [`Settings`]: logging, network timeouts and the notification command,
//!   loaded from a TOML file at:
//!   1. `$MAILRELAY_CONFIG` (environment variable)
//!   2. `~/.config/mailrelay/config.toml` (Linux/macOS)
//!      `%APPDATA%\mailrelay\config.toml` (Windows)
//!   3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::parser::pattern::FilenamePattern;

/// Subject used when the original one is not inherited.
pub const DEFAULT_SUBJECT: &str = "[Auto] Forwarded attachment";

/// Port on which SMTP speaks TLS from the first byte.
pub const SMTPS_PORT: u16 = 465;

/// Mail hosting provider; supplies connection defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Beget,
    Generic,
}

impl Provider {
    fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "beget" => Ok(Self::Beget),
            "generic" => Ok(Self::Generic),
            other => Err(RelayError::Config(format!(
                "unknown MAIL_PROVIDER '{other}' (expected 'beget' or 'generic')"
            ))),
        }
    }

    fn default_imap(self) -> Option<Endpoint> {
        match self {
            Self::Beget => Some(Endpoint::new("imap.beget.com", 993)),
            Self::Generic => None,
        }
    }

    fn default_smtp(self) -> Option<Endpoint> {
        match self {
            Self::Beget => Some(Endpoint::new("smtp.beget.com", SMTPS_PORT)),
            Self::Generic => None,
        }
    }

    fn default_body(self) -> &'static str {
        match self {
            Self::Beget => "The file was forwarded automatically from the Beget mailbox.",
            Self::Generic => "The file was forwarded automatically.",
        }
    }
}

/// A `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Login shared by the mailbox and the transport.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Immutable snapshot of everything one pass needs.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardPolicy {
    pub provider: Provider,
    pub imap: Endpoint,
    pub smtp: Endpoint,
    pub credentials: Credentials,
    /// Outbound `From:`.
    pub sender: String,
    /// Outbound `To:`.
    pub recipient: String,
    /// Only messages from this address are forwarded; `None` accepts all.
    pub expected_sender: Option<String>,
    /// Attachment filename filter; `None` accepts all.
    pub attachment_pattern: Option<FilenamePattern>,
    pub same_subject: bool,
    pub same_body: bool,
    /// Clear `\Seen` after a successful forward instead of setting it.
    pub set_unread: bool,
    pub default_subject: String,
    pub default_body: String,
}

impl ForwardPolicy {
    /// Read the policy from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the policy through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match get("MAIL_PROVIDER") {
            Some(name) => Provider::from_name(&name)?,
            None => Provider::Beget,
        };

        let (user, password, recipient) = match (
            get("EMAIL_USER"),
            get("EMAIL_PASSWORD"),
            get("RECIPIENT_EMAIL"),
        ) {
            (Some(u), Some(p), Some(r)) => (u, p, r),
            _ => {
                return Err(RelayError::Config(
                    "missing required env vars: EMAIL_USER, EMAIL_PASSWORD, RECIPIENT_EMAIL".into(),
                ))
            }
        };

        let imap = endpoint(&get, "IMAP", provider.default_imap())?;
        let smtp = endpoint(&get, "SMTP", provider.default_smtp())?;

        let attachment_pattern = get("ATTACHMENT_FILENAME_PATTERN")
            .map(|p| FilenamePattern::new(&p))
            .transpose()?;

        Ok(Self {
            provider,
            imap,
            smtp,
            sender: get("SENDER_EMAIL").unwrap_or_else(|| user.clone()),
            credentials: Credentials { user, password },
            recipient,
            expected_sender: get("EXPECTED_SENDER").map(|s| s.trim().to_string()),
            attachment_pattern,
            same_subject: flag(&get, "SAME_SUBJECT", true)?,
            same_body: flag(&get, "SAME_BODY", true)?,
            set_unread: flag(&get, "SET_UNREAD", false)?,
            default_subject: get("DEFAULT_SUBJECT").unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            default_body: get("DEFAULT_BODY")
                .unwrap_or_else(|| provider.default_body().to_string()),
        })
    }
}

/// Resolve `<PREFIX>_HOST` / `<PREFIX>_PORT` against the provider default.
fn endpoint(
    get: &impl Fn(&str) -> Option<String>,
    prefix: &str,
    default: Option<Endpoint>,
) -> Result<Endpoint> {
    let host_key = format!("{prefix}_HOST");
    let port_key = format!("{prefix}_PORT");

    let host = get(&host_key)
        .or_else(|| default.as_ref().map(|d| d.host.clone()))
        .ok_or_else(|| RelayError::Config(format!("{host_key} is required")))?;

    let port = match get(&port_key) {
        Some(raw) => raw
            .trim()
            .parse::<u16>()
            .map_err(|e| RelayError::Config(format!("invalid {port_key} '{raw}': {e}")))?,
        None => default
            .map(|d| d.port)
            .ok_or_else(|| RelayError::Config(format!("{port_key} is required")))?,
    };

    Ok(Endpoint::new(host, port))
}

fn flag(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match get(key) {
        None => Ok(default),
        Some(raw) => parse_bool(&raw)
            .ok_or_else(|| RelayError::Config(format!("invalid boolean for {key}: '{raw}'"))),
    }
}

/// Accepts the usual spellings: `true/false`, `1/0`, `yes/no`, `on/off`, `y/n`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

// ── Ambient settings (TOML) ─────────────────────────────────────

/// Top-level settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logging.
    pub general: GeneralSettings,
    /// Timeouts for mailbox and transport I/O.
    pub network: NetworkSettings,
    /// External notification channel.
    pub notify: NotifySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override directory for `mailrelay.log`.
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Read/write timeout per protocol operation in seconds.
    pub io_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    /// Shell command that receives each status message on stdin.
    pub command: Option<String>,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            io_timeout_secs: 60,
        }
    }
}

impl NetworkSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs.max(1))
    }
}

/// Load settings, searching standard locations.
///
/// Returns the defaults if no file is found or on parse error.
pub fn load_settings() -> Settings {
    if let Some(path) = settings_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Settings>(&contents) {
                    Ok(settings) => {
                        tracing::info!(path = %path.display(), "Loaded settings");
                        return settings;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse settings, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read settings file, using defaults"
                    );
                }
            }
        }
    }
    Settings::default()
}

/// Determine the settings file path (checking env var first, then standard dirs).
pub fn settings_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILRELAY_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailrelay").join("config.toml"))
}

/// Directory for `mailrelay.log`.
pub fn log_dir(settings: &Settings) -> PathBuf {
    if let Some(ref dir) = settings.general.log_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailrelay")
}
