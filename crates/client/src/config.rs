//! Client configuration and path resolution.
//!
//! Data dir resolved from: CLI `--data-dir` > `LEGION_DATA_DIR` env > `~/.legion`.
//! `client.toml` inside it is optional; `LEGION_SERVER_URL` overrides its
//! `server_url`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::reconnect::ReconnectPolicy;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:18790";
const CONFIG_FILE: &str = "client.toml";

/// Resolve the data directory. Does not create it.
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Some(env_val) = std::env::var_os("LEGION_DATA_DIR").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(env_val));
    }
    dirs::home_dir()
        .map(|home| home.join(".legion"))
        .ok_or(ConfigError::NoHomeDir)
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// `[reconnect]` table of `client.toml`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub step_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            step_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.step_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Contents of `client.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server_url: String,
    pub model: Option<String>,
    pub thinking: Option<bool>,
    pub reconnect: ReconnectConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            model: None,
            thinking: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl FileConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved settings the client runs with
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub data_dir: PathBuf,
    /// HTTP base of the backend, no trailing slash
    pub server_url: String,
    /// WebSocket base derived from `server_url`
    pub ws_base: String,
    pub model: Option<String>,
    pub thinking: Option<bool>,
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    /// Resolve the data dir, read `client.toml`, apply overrides.
    ///
    /// `server_url` wins over `LEGION_SERVER_URL`, which wins over the file.
    pub fn load(
        explicit_data_dir: Option<&Path>,
        server_url: Option<String>,
    ) -> Result<Self, ConfigError> {
        let data_dir = resolve_data_dir(explicit_data_dir)?;
        let file = FileConfig::load(&config_path(&data_dir))?;
        let server_override = server_url
            .or_else(|| std::env::var("LEGION_SERVER_URL").ok())
            .filter(|v| !v.trim().is_empty());
        Self::from_parts(data_dir, file, server_override)
    }

    pub fn from_parts(
        data_dir: PathBuf,
        file: FileConfig,
        server_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        let server_url = server_override
            .unwrap_or(file.server_url)
            .trim()
            .trim_end_matches('/')
            .to_string();
        let ws_base = ws_base_for(&server_url)?;
        Ok(Self {
            data_dir,
            server_url,
            ws_base,
            model: file.model,
            thinking: file.thinking,
            reconnect: file.reconnect,
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        log_dir(&self.data_dir)
    }

    /// WebSocket URL for one conversation
    pub fn conversation_ws_url(&self, conversation_id: &str) -> String {
        conversation_ws_url(&self.ws_base, conversation_id)
    }
}

pub fn conversation_ws_url(ws_base: &str, conversation_id: &str) -> String {
    format!(
        "{}/api/conversations/ws/{}",
        ws_base.trim_end_matches('/'),
        urlencoding::encode(conversation_id)
    )
}

/// `http→ws`, `https→wss`. WebSocket URLs pass through unchanged.
pub fn ws_base_for(server_url: &str) -> Result<String, ConfigError> {
    let url = server_url.trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(url.to_string())
    } else {
        Err(ConfigError::UnsupportedScheme(server_url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_base_follows_http_scheme() {
        assert_eq!(
            ws_base_for("http://127.0.0.1:18790").unwrap(),
            "ws://127.0.0.1:18790"
        );
        assert_eq!(
            ws_base_for("https://legion.example.com/").unwrap(),
            "wss://legion.example.com"
        );
        assert!(matches!(
            ws_base_for("ftp://nope"),
            Err(ConfigError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn conversation_ids_are_url_encoded() {
        assert_eq!(
            conversation_ws_url("ws://localhost:18790/", "a b/c"),
            "ws://localhost:18790/api/conversations/ws/a%20b%2Fc"
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileConfig::load(&config_path(dir.path())).unwrap();
        assert_eq!(file, FileConfig::default());
        assert_eq!(file.reconnect.max_attempts, 5);
    }

    #[test]
    fn file_values_and_override_resolve() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            config_path(dir.path()),
            r#"
server_url = "https://legion.internal:8443/"
model = "kimi-k2"
thinking = true

[reconnect]
max_attempts = 3
"#,
        )
        .unwrap();

        let file = FileConfig::load(&config_path(dir.path())).unwrap();
        assert_eq!(file.reconnect.max_attempts, 3);
        assert_eq!(file.reconnect.step_ms, 1000);

        let config = ClientConfig::from_parts(dir.path().to_path_buf(), file.clone(), None).unwrap();
        assert_eq!(config.server_url, "https://legion.internal:8443");
        assert_eq!(config.ws_base, "wss://legion.internal:8443");
        assert_eq!(config.model.as_deref(), Some("kimi-k2"));

        let overridden = ClientConfig::from_parts(
            dir.path().to_path_buf(),
            file,
            Some("http://localhost:9000".to_string()),
        )
        .unwrap();
        assert_eq!(overridden.ws_base, "ws://localhost:9000");
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(config_path(dir.path()), "server_url = [").unwrap();
        assert!(matches!(
            FileConfig::load(&config_path(dir.path())),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn explicit_data_dir_wins() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_data_dir(Some(dir.path())).unwrap(), dir.path());
    }
}
