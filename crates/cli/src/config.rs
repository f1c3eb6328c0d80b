//! CLI configuration.
//!
//! Priority per setting: flag / env (clap) > `<data_dir>/config.toml` > built-in default.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tether_client::config::{
    resolve_data_dir, DEFAULT_API_URL, DEFAULT_REALTIME_URL, DEFAULT_REFRESH_PATH,
    DEFAULT_SIGN_IN_PATH,
};
use tether_client::ClientConfig;

pub const CONFIG_FILE: &str = "config.toml";

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub api_url: Option<String>,
    pub realtime_url: Option<String>,
    pub refresh_path: Option<String>,
    pub sign_in_path: Option<String>,
}

impl FileConfig {
    /// Missing file is an empty config; a malformed one is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }
}

/// Values supplied on the command line (or their env fallbacks).
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub api_url: Option<String>,
    pub realtime_url: Option<String>,
}

pub fn resolve(overrides: &Overrides) -> anyhow::Result<ClientConfig> {
    let data_dir = resolve_data_dir(overrides.data_dir.as_deref())?;
    let file = FileConfig::load(&data_dir.join(CONFIG_FILE))?;
    Ok(merge(overrides, file, data_dir))
}

fn merge(overrides: &Overrides, file: FileConfig, data_dir: PathBuf) -> ClientConfig {
    let api = overrides
        .api_url
        .clone()
        .or(file.api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let realtime = overrides
        .realtime_url
        .clone()
        .or(file.realtime_url)
        .unwrap_or_else(|| DEFAULT_REALTIME_URL.to_string());

    let mut config = ClientConfig::new(api, realtime)
        .with_data_dir(data_dir)
        .with_refresh_path(
            file.refresh_path
                .unwrap_or_else(|| DEFAULT_REFRESH_PATH.to_string()),
        );
    config.sign_in_path = file
        .sign_in_path
        .unwrap_or_else(|| DEFAULT_SIGN_IN_PATH.to_string());
    config
}
