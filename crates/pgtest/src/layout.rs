//! On-disk layout of an instance root: `data/` for the cluster and `sock/`
//! for the unix socket.

use std::fs::{self, DirBuilder, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt, chown};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::LAYOUT_TARGET;
use crate::identity::ExecutionIdentity;

const DATA_DIR: &str = "data";
const SOCKET_DIR: &str = "sock";
const TEMP_PREFIX: &str = "pgtest";
const SUBDIR_MODE: u32 = 0o770;
const ROOT_MODE: u32 = 0o700;
const TRAVERSABLE_ROOT_MODE: u32 = 0o711;

/// Errors raised while preparing the instance directories.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// The private temporary root could not be allocated.
    #[error("failed to allocate a temporary directory: {source}")]
    TempDir {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A directory could not be created.
    #[error("failed to create directory '{path}': {source}")]
    Create {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Changing a directory's mode failed.
    #[error("failed to change permissions of '{path}': {source}")]
    Permissions {
        /// Directory whose mode could not be changed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Changing a directory's owner failed.
    #[error("failed to change ownership of '{path}': {source}")]
    Ownership {
        /// Directory whose owner could not be changed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Paths owned by one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLayout {
    root: PathBuf,
    data_dir: PathBuf,
    socket_dir: PathBuf,
}

impl ClusterLayout {
    /// Derives the layout below `root` without touching the filesystem.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data_dir: root.join(DATA_DIR),
            socket_dir: root.join(SOCKET_DIR),
            root,
        }
    }

    /// Creates the root and its subdirectories, adjusting ownership for
    /// `identity`.
    ///
    /// A missing `root` means a fresh private temporary directory. Existing
    /// directories keep their mode so a previously initialised cluster stays
    /// acceptable to the server. Partially created directories are left in
    /// place on failure.
    ///
    /// # Errors
    ///
    /// Returns a [`ProvisioningError`] naming the path that failed.
    pub fn provision(
        root: Option<&Path>,
        identity: &ExecutionIdentity,
    ) -> Result<Self, ProvisioningError> {
        let root = match root {
            Some(path) => {
                create_dir(path, ROOT_MODE)?;
                path.to_path_buf()
            }
            None => allocate_temp_root()?,
        };
        let layout = Self::new(root);
        create_dir(&layout.data_dir, SUBDIR_MODE)?;
        create_dir(&layout.socket_dir, SUBDIR_MODE)?;

        if let Some((uid, gid)) = identity.ownership() {
            set_mode(&layout.root, TRAVERSABLE_ROOT_MODE)?;
            for path in [&layout.data_dir, &layout.socket_dir] {
                chown(path, Some(uid.as_raw()), Some(gid.as_raw())).map_err(|source| {
                    ProvisioningError::Ownership {
                        path: path.clone(),
                        source,
                    }
                })?;
            }
        }

        debug!(
            target: LAYOUT_TARGET,
            root = %layout.root.display(),
            elevated = identity.is_elevated(),
            "instance directories prepared"
        );
        Ok(layout)
    }

    /// Root directory holding `data/` and `sock/`.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cluster storage directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding the server's unix socket.
    #[must_use]
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }
}

/// Removes an instance root when dropped unless it was marked persistent.
///
/// Teardown holds one of these for its whole duration so the removal still
/// runs when signalling or waiting fails part-way.
#[derive(Debug)]
pub(crate) struct RootCleanup<'a> {
    root: &'a Path,
    persistent: bool,
}

impl<'a> RootCleanup<'a> {
    pub(crate) const fn new(root: &'a Path, persistent: bool) -> Self {
        Self { root, persistent }
    }
}

impl Drop for RootCleanup<'_> {
    fn drop(&mut self) {
        if self.persistent {
            debug!(
                target: LAYOUT_TARGET,
                root = %self.root.display(),
                "keeping persistent instance directory"
            );
            return;
        }
        match fs::remove_dir_all(self.root) {
            Ok(()) => debug!(
                target: LAYOUT_TARGET,
                root = %self.root.display(),
                "instance directory removed"
            ),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                target: LAYOUT_TARGET,
                root = %self.root.display(),
                error = %error,
                "failed to remove instance directory"
            ),
        }
    }
}

fn allocate_temp_root() -> Result<PathBuf, ProvisioningError> {
    tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .permissions(Permissions::from_mode(ROOT_MODE))
        .tempdir()
        .map(tempfile::TempDir::keep)
        .map_err(|source| ProvisioningError::TempDir { source })
}

fn create_dir(path: &Path, mode: u32) -> Result<(), ProvisioningError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true).mode(mode);
    builder
        .create(path)
        .map_err(|source| ProvisioningError::Create {
            path: path.to_path_buf(),
            source,
        })
}

fn set_mode(path: &Path, mode: u32) -> Result<(), ProvisioningError> {
    fs::set_permissions(path, Permissions::from_mode(mode)).map_err(|source| {
        ProvisioningError::Permissions {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn scratch() -> TempDir {
        TempDir::new().expect("create scratch directory")
    }

    fn unprivileged() -> ExecutionIdentity {
        ExecutionIdentity::Inherited {
            user: String::from("tester"),
        }
    }

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path)
            .expect("directory metadata")
            .permissions()
            .mode()
            & 0o777
    }

    #[rstest]
    fn creates_data_and_socket_directories(scratch: TempDir) {
        let root = scratch.path().join("instance");
        let layout =
            ClusterLayout::provision(Some(&root), &unprivileged()).expect("provisioning succeeds");

        assert_eq!(layout.root(), root);
        assert!(layout.data_dir().is_dir());
        assert!(layout.socket_dir().is_dir());
        assert_eq!(mode_of(layout.data_dir()) & 0o007, 0, "no world access");
        assert_eq!(mode_of(layout.socket_dir()) & 0o007, 0, "no world access");
    }

    #[rstest]
    fn existing_directories_keep_their_mode(scratch: TempDir) {
        let layout = ClusterLayout::new(scratch.path());
        fs::create_dir(layout.data_dir()).expect("create data dir");
        fs::set_permissions(layout.data_dir(), Permissions::from_mode(0o700))
            .expect("tighten data dir");

        ClusterLayout::provision(Some(scratch.path()), &unprivileged())
            .expect("provisioning succeeds");

        assert_eq!(mode_of(layout.data_dir()), 0o700);
    }

    #[test]
    fn allocates_a_private_temporary_root() {
        let layout = ClusterLayout::provision(None, &unprivileged()).expect("provisioning succeeds");
        let name = layout
            .root()
            .file_name()
            .and_then(|name| name.to_str())
            .expect("temporary root has a name");
        assert!(name.starts_with(TEMP_PREFIX), "unexpected root name: {name}");
        assert_eq!(mode_of(layout.root()) & 0o077, 0);
        fs::remove_dir_all(layout.root()).expect("clean up temporary root");
    }

    #[rstest]
    #[case::transient(false, false)]
    #[case::persistent(true, true)]
    fn cleanup_respects_persistence(
        scratch: TempDir,
        #[case] persistent: bool,
        #[case] survives: bool,
    ) {
        let root = scratch.path().join("instance");
        ClusterLayout::provision(Some(&root), &unprivileged()).expect("provisioning succeeds");

        drop(RootCleanup::new(&root, persistent));

        assert_eq!(root.exists(), survives);
    }

    #[rstest]
    fn cleanup_tolerates_a_missing_root(scratch: TempDir) {
        let root = scratch.path().join("never-created");
        drop(RootCleanup::new(&root, false));
        assert!(!root.exists());
    }
}
