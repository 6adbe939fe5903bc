//! Destination directories for received packages.

use std::path::PathBuf;

use devlink_protocol::{EnvVersion, PackageKind};

/// Version directory the shared runtime is unpacked into while developing.
const DEV_SDK_VERSION: &str = "dev";

/// Where each package kind is installed on this device.
#[derive(Debug, Clone)]
pub struct PackageLayout {
    /// Root of the shared runtime installs (`<sdk_root>/<version>`).
    pub sdk_root: PathBuf,
    /// Root of app bundles (`<apps_root>/<appId>/<env>`).
    pub apps_root: PathBuf,
}

impl PackageLayout {
    pub fn new(sdk_root: impl Into<PathBuf>, apps_root: impl Into<PathBuf>) -> Self {
        Self {
            sdk_root: sdk_root.into(),
            apps_root: apps_root.into(),
        }
    }

    /// Resolves the directory a package for `app_id` unpacks into.
    ///
    /// Returns `None` for app ids that are not a single plain path
    /// component.
    pub fn destination(&self, kind: PackageKind, app_id: &str) -> Option<PathBuf> {
        if !is_plain_component(app_id) {
            return None;
        }

        Some(match kind {
            PackageKind::Sdk => self.sdk_root.join(DEV_SDK_VERSION),
            PackageKind::App => self
                .apps_root
                .join(app_id)
                .join(EnvVersion::Develop.as_str()),
        })
    }
}

fn is_plain_component(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
}
