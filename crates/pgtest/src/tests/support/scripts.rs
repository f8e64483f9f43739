//! Shell scripts standing in for a PostgreSQL installation.

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::TempDir;

/// Initdb stand-in that lays down the cluster marker.
pub(crate) const MARKING_INITDB: &str = "#!/bin/sh\ntouch \"$2/postgresql.conf\"\n";

/// Initdb stand-in that must never run.
pub(crate) const FAILING_INITDB: &str = "#!/bin/sh\necho 'initdb must not run' >&2\nexit 1\n";

/// Server stand-in that dies during startup.
pub(crate) const CRASHING_POSTGRES: &str =
    "#!/bin/sh\necho 'FATAL: unrecognized configuration parameter \"bogus\"' >&2\nexit 1\n";

/// Server stand-in that stays up without ever opening its socket.
pub(crate) const SILENT_POSTGRES: &str =
    "#!/bin/sh\ntrap 'exit 0' INT\ni=0\nwhile [ $i -lt 200 ]; do sleep 0.05; i=$((i+1)); done\n";

/// Directory of executable scripts named like the PostgreSQL binaries.
pub(crate) struct FakeInstallation {
    dir: TempDir,
}

impl FakeInstallation {
    pub(crate) fn new(initdb: &str, postgres: &str) -> Self {
        let dir = TempDir::new().expect("create fake installation directory");
        // Readable by the service account the scripts run as under root.
        fs::set_permissions(dir.path(), Permissions::from_mode(0o755))
            .expect("open fake installation directory");
        write_script(&dir.path().join("initdb"), initdb);
        write_script(&dir.path().join("postgres"), postgres);
        Self { dir }
    }

    pub(crate) fn bin_dir(&self) -> &Path {
        self.dir.path()
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write fake executable");
    fs::set_permissions(path, Permissions::from_mode(0o755)).expect("make fake executable");
}
