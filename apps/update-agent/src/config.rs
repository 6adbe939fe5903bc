//! Update agent configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/devlink/agent.toml`
//! - Windows: `%APPDATA%/devlink/agent.toml`
//!
//! Installed bundles and the version record default to the platform data
//! directory (`~/.local/share/devlink` on Linux).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use devlink_protocol::constants::{DEFAULT_HOST, DEFAULT_PORT};
use devlink_update_client::{ClientConfig, PackageLayout};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connect to the dev server at all.
    #[serde(default)]
    pub use_dev_server: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared runtime installs.
    #[serde(default = "default_sdk_root")]
    pub sdk_root: PathBuf,

    /// App bundles, one directory per app id.
    #[serde(default = "default_apps_root")]
    pub apps_root: PathBuf,

    /// JSON record of installed versions.
    #[serde(default = "default_versions_file")]
    pub versions_file: PathBuf,
}

fn default_host() -> String {
    DEFAULT_HOST.into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_sdk_root() -> PathBuf {
    data_dir().join("sdk")
}

fn default_apps_root() -> PathBuf {
    data_dir().join("apps")
}

fn default_versions_file() -> PathBuf {
    data_dir().join("versions.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_dev_server: false,
            host: default_host(),
            port: default_port(),
            sdk_root: default_sdk_root(),
            apps_root: default_apps_root(),
            versions_file: default_versions_file(),
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

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            use_dev_server: self.use_dev_server,
            host: self.host.clone(),
            port: self.port,
            ..ClientConfig::default()
        }
    }

    pub fn layout(&self) -> PackageLayout {
        PackageLayout::new(&self.sdk_root, &self.apps_root)
    }
}

fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("devlink")
            .join("agent.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("devlink").join("agent.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/devlink/agent.toml"))
    }
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".local").join("share").join("devlink")
    }

    #[cfg(target_os = "windows")]
    {
        let local =
            std::env::var("LOCALAPPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData\\Local".into());
        PathBuf::from(local).join("devlink")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("/tmp/devlink")
    }
}
