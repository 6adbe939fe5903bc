use std::fmt;

/// Which part of an application bundle a file frame updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    /// The shared runtime used by every app.
    Sdk,
    /// The application's own bundle.
    App,
}

impl PackageKind {
    /// Maps a header component onto a package kind. Any other literal is
    /// not a package this protocol knows about.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sdk" => Some(PackageKind::Sdk),
            "app" => Some(PackageKind::App),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PackageKind::Sdk => "sdk",
            PackageKind::App => "app",
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
