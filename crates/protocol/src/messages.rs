//! JSON bodies carried by control frames and client text messages.

use serde::{Deserialize, Serialize};

/// Body of a `--CHECKVERSION--` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCheck {
    pub app_id: String,
}

/// Body of an `--UPDATE--` frame: the packages an app still needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
    pub app_id: String,
    /// Package names still owed. Not a set: duplicates are consumed one
    /// per received file frame.
    pub files: Vec<String>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_options: Option<LaunchOptions>,
}

impl UpdateManifest {
    /// Removes the first entry equal to `package`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn consume(&mut self, package: &str) -> bool {
        match self.files.iter().position(|f| f == package) {
            Some(index) => {
                self.files.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.files.is_empty()
    }
}

/// Launch hints forwarded verbatim to whoever reloads the app.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    /// Keys this protocol does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Text messages sent from the client to the transfer server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Reply to a version check: the locally recorded development version.
    Version { version: String },
}

/// Environment an app version is recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvVersion {
    Develop,
    Trial,
    Release,
}

impl EnvVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvVersion::Develop => "develop",
            EnvVersion::Trial => "trial",
            EnvVersion::Release => "release",
        }
    }
}
