//! Locates the `initdb` and `postgres` executables.
//!
//! Fedora and friends put them on `PATH`; Debian and Ubuntu keep them in a
//! versioned directory below `/usr/lib/postgresql` instead.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::BINARIES_TARGET;

const INITDB: &str = "initdb";
const POSTGRES: &str = "postgres";
const VERSIONED_ROOTS: &[&str] = &["/usr/lib/postgresql"];
const FIXED_DIRS: &[&str] = &["/usr/local/pgsql/bin"];

/// Errors raised while locating the PostgreSQL executables.
#[derive(Debug, Error)]
pub enum BinaryLookupError {
    /// No candidate directory contained `initdb`.
    #[error("did not find PostgreSQL executables installed (searched: {})", display_paths(.searched))]
    NotFound {
        /// Directories probed, in order.
        searched: Vec<PathBuf>,
    },
}

/// Absolute paths of the executables an instance needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPaths {
    bin_dir: PathBuf,
}

impl BinaryPaths {
    /// Uses `bin_dir` as-is when supplied, otherwise searches `PATH` and the
    /// conventional installation directories.
    ///
    /// # Errors
    ///
    /// Returns [`BinaryLookupError::NotFound`] when no search location holds
    /// `initdb`.
    pub fn locate(bin_dir: Option<&Path>) -> Result<Self, BinaryLookupError> {
        if let Some(dir) = bin_dir {
            return Ok(Self::in_dir(dir));
        }
        let path = env::var_os("PATH").unwrap_or_default();
        let mut searched: Vec<PathBuf> = env::split_paths(&path).collect();
        if let Some(found) = first_with_initdb(&searched) {
            return Ok(found);
        }

        let mut fallbacks = Vec::new();
        for root in VERSIONED_ROOTS {
            fallbacks.extend(versioned_bin_dirs(Path::new(root)));
        }
        fallbacks.extend(FIXED_DIRS.iter().map(PathBuf::from));
        if let Some(found) = first_with_initdb(&fallbacks) {
            return Ok(found);
        }

        searched.extend(fallbacks);
        Err(BinaryLookupError::NotFound { searched })
    }

    /// Treats `dir` as the binary directory without probing it.
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: dir.into(),
        }
    }

    /// Directory holding the executables.
    #[must_use]
    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    /// Path of the cluster initialisation tool.
    #[must_use]
    pub fn initdb(&self) -> PathBuf {
        self.bin_dir.join(INITDB)
    }

    /// Path of the server executable.
    #[must_use]
    pub fn postgres(&self) -> PathBuf {
        self.bin_dir.join(POSTGRES)
    }
}

fn first_with_initdb(candidates: &[PathBuf]) -> Option<BinaryPaths> {
    let dir = candidates
        .iter()
        .find(|dir| dir.join(INITDB).is_file())?;
    debug!(
        target: BINARIES_TARGET,
        bin_dir = %dir.display(),
        "found PostgreSQL executables"
    );
    Some(BinaryPaths::in_dir(dir.clone()))
}

/// Lists `<root>/<version>/bin`, newest version first.
fn versioned_bin_dirs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut versions: Vec<(Vec<u64>, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            (version_key(&name), entry.path().join("bin"))
        })
        .collect();
    versions.sort_by(|left, right| right.0.cmp(&left.0));
    versions.into_iter().map(|(_, dir)| dir).collect()
}

fn version_key(name: &str) -> Vec<u64> {
    name.split('.')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
