//! Extended version information of the current build
//!
//! Contains more information than a typical version string, to make error reporting easier for
//! the developer. See [Version] for the full list of stored information.

/// Full information about the current build
pub struct Version {
    /// Version of the package, reported in Cargo.toml
    pkg_version: &'static str,

    /// Short hash of the commit pointed at by HEAD in git
    hash: &'static str,

    /// Full hash of the commit pointed at by HEAD in git
    full_hash: &'static str,

    /// The state of the repository during the build
    ///
    /// dirty = repository contained not committed changes
    dirty: &'static str,
}

impl Default for Version {
    /// Construct full [Version] information from the values passed by `src/build.rs`
    fn default() -> Self {
        Self {
            pkg_version: env!("CARGO_PKG_VERSION"),
            hash: env!("GIT_STATUS_HASH"),
            full_hash: env!("GIT_STATUS_FULL_HASH"),
            dirty: {
                let dirty = env!("GIT_STATUS_DIRTY");
                if dirty == "dirty" {
                    " dirty"
                } else {
                    ""
                }
            },
        }
    }
}

impl Version {
    /// Full commit hash this build was produced from
    pub fn full_hash(&self) -> &'static str {
        self.full_hash
    }
}

/// Pretty print version information in terminal
impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            pkg_version,
            hash,
            dirty,
            ..
        } = self;
        write!(f, "{pkg_version} ({hash}{dirty})")
    }
}
