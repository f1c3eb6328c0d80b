//! Client configuration and data directory resolution.
//!
//! Data dir priority: explicit arg > `TETHER_DATA_DIR` env > `~/.tether`.

use std::path::{Path, PathBuf};

use crate::error::{ClientError, Result};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_REALTIME_URL: &str = "ws://127.0.0.1:3000/realtime";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const DEFAULT_SIGN_IN_PATH: &str = "/auth/sign-in";

const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL for REST calls, without a trailing slash
    pub api_base_url: String,
    /// WebSocket endpoint of the realtime channel
    pub realtime_url: String,
    /// Path of the token renewal endpoint
    pub refresh_path: String,
    pub sign_in_path: String,
    pub data_dir: PathBuf,
}

impl ClientConfig {
    pub fn new(api_base_url: impl Into<String>, realtime_url: impl Into<String>) -> Self {
        Self {
            api_base_url: trim_base(api_base_url.into()),
            realtime_url: realtime_url.into(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
            data_dir: PathBuf::from(".tether"),
        }
    }

    /// Build from `TETHER_API_URL`, `TETHER_REALTIME_URL` and `TETHER_DATA_DIR`,
    /// falling back to local defaults.
    pub fn from_env() -> Result<Self> {
        let api = std::env::var("TETHER_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let realtime =
            std::env::var("TETHER_REALTIME_URL").unwrap_or_else(|_| DEFAULT_REALTIME_URL.into());
        let data_dir = resolve_data_dir(None)?;
        Ok(Self::new(api, realtime).with_data_dir(data_dir))
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.api_base_url, path)
        } else {
            format!("{}/{}", self.api_base_url, path)
        }
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Resolve the data directory without touching the filesystem.
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Ok(env_val) = std::env::var("TETHER_DATA_DIR") {
        if !env_val.trim().is_empty() {
            return Ok(PathBuf::from(env_val));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".tether"))
        .ok_or_else(|| ClientError::Config("HOME directory not found".into()))
}

fn trim_base(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_paths_without_double_slashes() {
        let config = ClientConfig::new("https://api.example.com/", "wss://rt.example.com");
        assert_eq!(config.url("/chats"), "https://api.example.com/chats");
        assert_eq!(config.url("chats"), "https://api.example.com/chats");
        assert_eq!(
            config.url("https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn explicit_data_dir_wins() {
        let dir = resolve_data_dir(Some(Path::new("/tmp/tether-test"))).expect("resolve");
        assert_eq!(dir, PathBuf::from("/tmp/tether-test"));
    }

    #[test]
    fn credentials_live_in_data_dir() {
        let config = ClientConfig::new("http://x", "ws://x").with_data_dir("/tmp/td");
        assert_eq!(
            config.credentials_path(),
            PathBuf::from("/tmp/td/credentials.json")
        );
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/td/logs"));
    }
}
