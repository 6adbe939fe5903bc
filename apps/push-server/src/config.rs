//! Push server configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/devlink/push.toml`
//! - Windows: `%APPDATA%/devlink/push.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use devlink_protocol::constants::{DEFAULT_HOST, DEFAULT_PORT};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// App whose bundle is served.
    #[serde(default)]
    pub app_id: String,

    /// Version announced to clients. Clients reporting anything else
    /// receive the bundle.
    #[serde(default = "default_version")]
    pub version: String,

    /// Directory packed as the `app` package.
    #[serde(default = "default_app_dir")]
    pub app_dir: PathBuf,

    /// Directory packed as the `sdk` package, if the runtime is pushed too.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_dir: Option<PathBuf>,

    /// Page the client should open after reloading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_page: Option<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_version() -> String {
    "dev".into()
}

fn default_app_dir() -> PathBuf {
    PathBuf::from("dist")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            app_id: String::new(),
            version: default_version(),
            app_dir: default_app_dir(),
            sdk_dir: None,
            launch_page: None,
        }
    }
}

impl Config {
    /// Loads `path`, or the platform config file when `None`. A missing
    /// file is created with defaults.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path,
            None => config_path()?,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("devlink")
            .join("push.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("devlink").join("push.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/devlink/push.toml"))
    }
}
