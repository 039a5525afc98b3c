//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.airavata/config.json`) and environment.
//! Every field has a default, so an empty `{}` file is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Fallback server used when neither env nor config names one.
pub const DEFAULT_BASE_URL: &str = "https://sih-saksham.onrender.com";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// REST API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Real-time socket settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Alert presentation settings.
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Where credentials are persisted.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server base URL shared by the REST client and the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL (e.g. "https://airavata.example.org"). Overridden by AIRAVATA_API_URL env.
    pub base_url: Option<String>,

    /// Request timeout in seconds (default 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Reconnection policy and heartbeat defaults for the event socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeConfig {
    /// Retry after a drop or failed connect (default true).
    #[serde(default = "default_true")]
    pub reconnection: bool,

    /// Consecutive attempts before giving up (default 5).
    #[serde(default = "default_reconnection_attempts")]
    pub reconnection_attempts: u32,

    /// Fixed delay between attempts in milliseconds (default 1000).
    #[serde(default = "default_reconnection_delay_ms")]
    pub reconnection_delay_ms: u64,

    /// Timeout for the WebSocket + Socket.IO handshake in milliseconds (default 20000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// How an incoming alert is presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertStyle {
    /// Stays until dismissed; vibration pattern 0-500-200-500.
    #[default]
    Modal,
    /// Banner that dismisses itself after `autoDismissSecs`; vibration pattern 0-500-200-500-200-500.
    HeadsUp,
}

/// Alert sinks and heads-up behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsConfig {
    /// "modal" (default) or "headsUp".
    #[serde(default)]
    pub style: AlertStyle,

    /// Heads-up alerts dismiss themselves after this many seconds (default 15). 0 disables.
    #[serde(default = "default_auto_dismiss_secs")]
    pub auto_dismiss_secs: u64,

    /// Run the vibration / sound cue when an alert is shown (default true).
    #[serde(default = "default_true")]
    pub sound: bool,

    /// Push token registered with the server after connect, if any.
    pub push_token: Option<String>,

    /// Device type sent with the push token (default "mobile").
    #[serde(default = "default_device_type")]
    pub device_type: String,
}

/// Credential persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Credential file (default: auth.json next to the config file).
    pub credentials_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_reconnection_attempts() -> u32 {
    5
}

fn default_reconnection_delay_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

fn default_auto_dismiss_secs() -> u64 {
    15
}

fn default_device_type() -> String {
    "mobile".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnection: true,
            reconnection_attempts: default_reconnection_attempts(),
            reconnection_delay_ms: default_reconnection_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            style: AlertStyle::default(),
            auto_dismiss_secs: default_auto_dismiss_secs(),
            sound: true,
            push_token: None,
            device_type: default_device_type(),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the server base URL: env AIRAVATA_API_URL (or the legacy EXPO_PUBLIC_API_URL)
/// overrides config; falls back to [`DEFAULT_BASE_URL`]. Trailing slashes are trimmed.
pub fn resolve_base_url(config: &Config) -> String {
    non_empty_env("AIRAVATA_API_URL")
        .or_else(|| non_empty_env("EXPO_PUBLIC_API_URL"))
        .or_else(|| {
            config
                .api
                .base_url
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("AIRAVATA_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".airavata").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Resolve the credential file: `auth.credentialsPath` if set (relative paths resolved against
/// the config file's parent), otherwise `auth.json` beside the config file.
pub fn resolve_credentials_path(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.auth.credentials_path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                config_parent.join(p)
            }
        }
        _ => config_parent.join("auth.json"),
    }
}

/// Load config from the given path, or the default path (or AIRAVATA_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Create the config directory and write `{}` to the config file if it does not exist.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;
    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }
    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.api.base_url.is_none());
        assert_eq!(config.api.request_timeout_secs, 30);
        assert!(config.realtime.reconnection);
        assert_eq!(config.realtime.reconnection_attempts, 5);
        assert_eq!(config.realtime.reconnection_delay_ms, 1000);
        assert_eq!(config.alerts.style, AlertStyle::Modal);
        assert_eq!(config.alerts.auto_dismiss_secs, 15);
        assert_eq!(config.alerts.device_type, "mobile");
    }

    #[test]
    fn programmatic_default_matches_empty_file() {
        let config = Config::default();
        assert_eq!(config.api.request_timeout_secs, 30);
        let from_api_only: Config = serde_json::from_str(r#"{"api":{}}"#).unwrap();
        assert_eq!(from_api_only.api.request_timeout_secs, 30);
    }

    #[test]
    fn camel_case_keys_are_read() {
        let config: Config = serde_json::from_str(
            r#"{"api":{"baseUrl":"http://10.0.0.2:5000/"},"realtime":{"reconnectionAttempts":2},"alerts":{"style":"headsUp"}}"#,
        )
        .unwrap();
        assert_eq!(config.api.base_url.as_deref(), Some("http://10.0.0.2:5000/"));
        assert_eq!(config.realtime.reconnection_attempts, 2);
        assert_eq!(config.realtime.reconnection_delay_ms, 1000);
        assert_eq!(config.alerts.style, AlertStyle::HeadsUp);
    }

    #[test]
    fn base_url_from_config_is_trimmed() {
        if non_empty_env("AIRAVATA_API_URL").is_some() || non_empty_env("EXPO_PUBLIC_API_URL").is_some() {
            return;
        }
        let mut config = Config::default();
        assert_eq!(resolve_base_url(&config), DEFAULT_BASE_URL);
        config.api.base_url = Some(" http://10.0.0.2:5000/ ".to_string());
        assert_eq!(resolve_base_url(&config), "http://10.0.0.2:5000");
    }

    #[test]
    fn credentials_path_default_is_beside_config() {
        let config = Config::default();
        let path = Path::new("/home/user/.airavata/config.json");
        assert_eq!(
            resolve_credentials_path(&config, path),
            PathBuf::from("/home/user/.airavata/auth.json")
        );
    }

    #[test]
    fn credentials_path_override_relative() {
        let mut config = Config::default();
        config.auth.credentials_path = Some(PathBuf::from("secrets/auth.json"));
        let path = Path::new("/home/user/.airavata/config.json");
        assert_eq!(
            resolve_credentials_path(&config, path),
            PathBuf::from("/home/user/.airavata/secrets/auth.json")
        );
    }

    #[test]
    fn credentials_path_override_absolute() {
        let mut config = Config::default();
        config.auth.credentials_path = Some(PathBuf::from("/var/lib/airavata/auth.json"));
        let path = Path::new("/home/user/.airavata/config.json");
        assert_eq!(
            resolve_credentials_path(&config, path),
            PathBuf::from("/var/lib/airavata/auth.json")
        );
    }

    #[test]
    fn init_writes_empty_object_once() {
        let dir = std::env::temp_dir().join(format!("airavata-init-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("config.json");
        init_config_dir(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
        std::fs::write(&path, r#"{"api":{}}"#).unwrap();
        init_config_dir(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"api":{}}"#);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
