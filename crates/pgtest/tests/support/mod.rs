//! Helpers shared by the integration suites.

use pgtest::{BinaryPaths, ExecutionIdentity};

/// Whether a real server can be started on this machine.
///
/// Needs `initdb` and `postgres` somewhere the locator searches, and a
/// `postgres` account when running as root.
pub fn postgres_available() -> bool {
    let binaries = BinaryPaths::locate(None).is_ok();
    let identity = ExecutionIdentity::resolve().is_ok();
    binaries && identity
}

/// Skips the test if no PostgreSQL installation is usable.
macro_rules! require_postgres {
    () => {
        if !$crate::support::postgres_available() {
            eprintln!(
                "Skipping test: PostgreSQL binaries not found (install the server package or put initdb on PATH)"
            );
            return;
        }
    };
}
