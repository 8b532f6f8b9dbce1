use std::fmt::{self, Display, Formatter};

/// Name, version and description of a worker binary built on `jobcore`.
///
/// Binaries pass theirs to `boot` with `AppInfo::new(env!("CARGO_PKG_NAME"), ..)`
/// so `version` reports them next to the library.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
}

impl AppInfo {
    #[must_use]
    pub const fn new(name: &'static str, version: &'static str, description: &'static str) -> Self {
        Self {
            name,
            version,
            description,
        }
    }

    /// This library's own package metadata
    #[must_use]
    pub const fn jobcore() -> Self {
        Self::new(
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_DESCRIPTION"),
        )
    }

    /// Whether this describes the library itself rather than an embedding binary
    #[must_use]
    pub fn is_jobcore(&self) -> bool {
        self.name == env!("CARGO_PKG_NAME")
    }
}

impl Display for AppInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_and_origin() {
        let app = AppInfo::new("thumbnailer", "1.2.0", "Renders thumbnails");

        assert_eq!(app.to_string(), "thumbnailer v1.2.0");
        assert!(!app.is_jobcore());
        assert!(AppInfo::jobcore().is_jobcore());
        assert!(AppInfo::jobcore().to_string().starts_with("jobcore v"));
    }
}
