//! One-time cluster initialisation.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tracing::info;

use crate::INITDB_TARGET;
use crate::binaries::BinaryPaths;
use crate::identity::ExecutionIdentity;
use crate::layout::ClusterLayout;
use crate::output::ProcessOutput;

/// File whose presence marks an initialised data directory.
pub const CLUSTER_MARKER: &str = "postgresql.conf";

/// Result of [`ensure_initialised`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// `initdb` ran and laid out a fresh cluster.
    Initialized,
    /// A cluster already existed and was reused untouched.
    AlreadyInitialized,
}

/// Errors raised by cluster initialisation.
#[derive(Debug, Error)]
pub enum InitializationError {
    /// `initdb` could not be executed at all.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        /// Program that failed to execute.
        program: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// `initdb` exited unsuccessfully.
    #[error("failed to initialize DB: {status}\n{output}")]
    Failed {
        /// Exit status reported by `initdb`.
        status: ExitStatus,
        /// Combined output for diagnosis.
        output: ProcessOutput,
    },
}

/// Path of the marker file inside `data_dir`.
#[must_use]
pub fn marker_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CLUSTER_MARKER)
}

/// Whether `data_dir` already holds a cluster.
#[must_use]
pub fn is_initialised(data_dir: &Path) -> bool {
    marker_path(data_dir).exists()
}

/// Runs `initdb` against the layout's data directory unless a cluster is
/// already there.
///
/// Durability is traded for speed: `--no-sync` skips flushing the fresh
/// cluster to disk. The contents of an existing cluster are trusted as-is.
///
/// # Errors
///
/// Returns an [`InitializationError`] when `initdb` cannot run or exits
/// non-zero; the error carries its output.
pub fn ensure_initialised(
    binaries: &BinaryPaths,
    layout: &ClusterLayout,
    identity: &ExecutionIdentity,
) -> Result<InitOutcome, InitializationError> {
    if is_initialised(layout.data_dir()) {
        info!(
            target: INITDB_TARGET,
            data_dir = %layout.data_dir().display(),
            "reusing initialised cluster"
        );
        return Ok(InitOutcome::AlreadyInitialized);
    }

    let program = binaries.initdb();
    let args = [
        OsStr::new("-D"),
        layout.data_dir().as_os_str(),
        OsStr::new("--no-sync"),
    ];
    info!(
        target: INITDB_TARGET,
        program = %program.display(),
        data_dir = %layout.data_dir().display(),
        "initialising cluster"
    );
    let output = identity
        .command(&program, args, layout.root())
        .stdin(Stdio::null())
        .output()
        .map_err(|source| InitializationError::Spawn {
            program: program.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(InitializationError::Failed {
            status: output.status,
            output: ProcessOutput::new(output.stdout, output.stderr),
        });
    }
    Ok(InitOutcome::Initialized)
}

#[cfg(test)]
mod tests {
    use std::fs::{self, Permissions};
    use std::os::unix::fs::PermissionsExt;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    struct Scratch {
        _dir: TempDir,
        layout: ClusterLayout,
        identity: ExecutionIdentity,
    }

    #[fixture]
    fn scratch() -> Scratch {
        let dir = TempDir::new().expect("create scratch directory");
        let identity = ExecutionIdentity::Inherited {
            user: String::from("tester"),
        };
        let layout =
            ClusterLayout::provision(Some(dir.path()), &identity).expect("provision layout");
        Scratch {
            _dir: dir,
            layout,
            identity,
        }
    }

    fn fake_initdb(bin_dir: &Path, script: &str) -> BinaryPaths {
        fs::create_dir_all(bin_dir).expect("create bin dir");
        let path = bin_dir.join("initdb");
        fs::write(&path, script).expect("write fake initdb");
        fs::set_permissions(&path, Permissions::from_mode(0o755)).expect("make executable");
        BinaryPaths::in_dir(bin_dir)
    }

    #[rstest]
    fn existing_marker_skips_initialisation(scratch: Scratch) {
        fs::write(marker_path(scratch.layout.data_dir()), "").expect("write marker");
        let binaries = BinaryPaths::in_dir("/nonexistent/bin");

        let outcome = ensure_initialised(&binaries, &scratch.layout, &scratch.identity)
            .expect("marker short-circuits initdb");

        assert_eq!(outcome, InitOutcome::AlreadyInitialized);
    }

    #[rstest]
    fn runs_initdb_with_data_dir_and_no_sync(scratch: Scratch) {
        let bin_dir = scratch.layout.root().join("bin");
        let binaries = fake_initdb(
            &bin_dir,
            "#!/bin/sh\n[ \"$1\" = -D ] && [ \"$3\" = --no-sync ] && touch \"$2/postgresql.conf\"\n",
        );

        let outcome = ensure_initialised(&binaries, &scratch.layout, &scratch.identity)
            .expect("fake initdb succeeds");

        assert_eq!(outcome, InitOutcome::Initialized);
        assert!(is_initialised(scratch.layout.data_dir()));
    }

    #[rstest]
    fn failure_carries_combined_output(scratch: Scratch) {
        let bin_dir = scratch.layout.root().join("bin");
        let binaries = fake_initdb(
            &bin_dir,
            "#!/bin/sh\necho 'creating cluster'\necho 'disk full' >&2\nexit 3\n",
        );

        let error = ensure_initialised(&binaries, &scratch.layout, &scratch.identity)
            .expect_err("failing initdb is fatal");

        match error {
            InitializationError::Failed { status, output } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(output.stdout().trim(), "creating cluster");
                assert_eq!(output.stderr().trim(), "disk full");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[rstest]
    fn missing_binary_is_a_spawn_error(scratch: Scratch) {
        let binaries = BinaryPaths::in_dir(scratch.layout.root().join("missing"));

        let error = ensure_initialised(&binaries, &scratch.layout, &scratch.identity)
            .expect_err("missing initdb cannot run");

        assert!(matches!(error, InitializationError::Spawn { .. }));
    }
}
