//! Locally recorded app versions, keyed by app id and environment.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use devlink_protocol::EnvVersion;

/// Errors from persisting the version record.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("version store lock poisoned")]
    Poisoned,
}

/// Version record shared with the rest of the host process.
pub trait VersionStore: Send + Sync + 'static {
    fn local_version(&self, app_id: &str, env: EnvVersion) -> Option<String>;

    fn set_local_version(
        &self,
        app_id: &str,
        env: EnvVersion,
        version: &str,
    ) -> Result<(), StoreError>;
}

/// In-process store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    versions: Mutex<HashMap<(String, EnvVersion), String>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionStore for MemoryVersionStore {
    fn local_version(&self, app_id: &str, env: EnvVersion) -> Option<String> {
        let versions = self.versions.lock().ok()?;
        versions.get(&(app_id.to_string(), env)).cloned()
    }

    fn set_local_version(
        &self,
        app_id: &str,
        env: EnvVersion,
        version: &str,
    ) -> Result<(), StoreError> {
        let mut versions = self.versions.lock().map_err(|_| StoreError::Poisoned)?;
        versions.insert((app_id.to_string(), env), version.to_string());
        Ok(())
    }
}

/// `{ "<appId>": { "<env>": "<version>" } }`
type VersionFile = BTreeMap<String, BTreeMap<String, String>>;

/// Store persisted as a JSON file, rewritten atomically on every change.
///
/// Writes block on file I/O; async callers go through a blocking worker.
#[derive(Debug)]
pub struct JsonVersionStore {
    path: PathBuf,
    versions: Mutex<VersionFile>,
}

impl JsonVersionStore {
    /// Opens the store at `path`, starting empty if the file is missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let versions = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VersionFile::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            versions: Mutex::new(versions),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, versions: &VersionFile) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(versions)?)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        tracing::debug!(path = %self.path.display(), "version record saved");
        Ok(())
    }
}

impl VersionStore for JsonVersionStore {
    fn local_version(&self, app_id: &str, env: EnvVersion) -> Option<String> {
        let versions = self.versions.lock().ok()?;
        versions.get(app_id)?.get(env.as_str()).cloned()
    }

    fn set_local_version(
        &self,
        app_id: &str,
        env: EnvVersion,
        version: &str,
    ) -> Result<(), StoreError> {
        let mut versions = self.versions.lock().map_err(|_| StoreError::Poisoned)?;
        let mut next = versions.clone();
        next.entry(app_id.to_string())
            .or_default()
            .insert(env.as_str().to_string(), version.to_string());
        // Memory only moves once the file has.
        self.persist(&next)?;
        *versions = next;
        Ok(())
    }
}
