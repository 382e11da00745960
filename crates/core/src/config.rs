//! Database directory resolution
//!
//! A Jari database is a single `redb` file. Its location is resolved from
//! the `JARI_DB` environment variable, falling back to a fixed per-user
//! default.

use std::env;
use std::path::{Path, PathBuf};

/// Name of the environment variable that overrides the database path.
pub const JARI_DB_ENV: &str = "JARI_DB";

/// Resolved location of the database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbPaths {
    file: PathBuf,
}

impl DbPaths {
    /// Resolve the database path from `JARI_DB`, or the per-user default
    /// if unset.
    pub fn resolve() -> Self {
        match env::var_os(JARI_DB_ENV) {
            Some(path) => Self::from_path(PathBuf::from(path)),
            None => Self::from_path(Self::default_path()),
        }
    }

    /// Build `DbPaths` from an explicit path, bypassing `JARI_DB`. Used by
    /// tests and by callers that already know where they want to open.
    pub fn from_path(file: impl AsRef<Path>) -> Self {
        DbPaths {
            file: file.as_ref().to_path_buf(),
        }
    }

    /// The `redb` database file path.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Ensure the parent directory exists, creating it if necessary.
    pub fn ensure_parent_dir(&self) -> std::io::Result<()> {
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        let home = env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        home.join(".jari").join("jari.redb")
    }
}
