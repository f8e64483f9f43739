//! Throwaway PostgreSQL servers for test suites.
//!
//! Each [`PgInstance`] owns one `postgres` process listening only on a unix
//! socket inside its own root directory, so any number of instances can run
//! side by side without picking TCP ports. Starting an instance:
//!
//! 1. resolves the account PostgreSQL runs as, dropping to `postgres` when
//!    invoked as root;
//! 2. provisions `<root>/data` and `<root>/sock`;
//! 3. locates `initdb` and `postgres`;
//! 4. runs `initdb` unless the data directory already holds a cluster;
//! 5. launches the server and polls it until it accepts connections and the
//!    test database exists.
//!
//! [`PgInstance::stop`] (or dropping the instance) signals the server, waits
//! for it and removes the root directory unless the instance is persistent.
//! A persistent instance rooted at a fixed directory is reused by the next
//! start without running `initdb` again.
//!
//! The crate logs through `tracing` under `pgtest::*` targets and never
//! installs a subscriber itself. Lifecycle events can also be observed
//! directly through a [`LifecycleObserver`].

mod binaries;
mod bootstrap;
mod config;
mod connection;
mod identity;
mod initdb;
mod instance;
mod layout;
mod observer;
mod output;
mod server;

use std::path::PathBuf;

pub use binaries::{BinaryLookupError, BinaryPaths};
pub use bootstrap::{
    BootstrapError, Catalog, CatalogError, CatalogOperation, PostgresCatalog, RetryPolicy,
    quote_identifier,
};
pub use config::{DEFAULT_DATABASE, PgConfig};
pub use connection::{ADMIN_DATABASE, ConnectionTarget, DEFAULT_PORT};
pub use identity::{ExecutionIdentity, PrivilegeError, SERVICE_ACCOUNT};
pub use initdb::{CLUSTER_MARKER, InitOutcome, InitializationError};
pub use instance::{PgInstance, StartError};
pub use layout::{ClusterLayout, ProvisioningError};
pub use observer::{LifecycleObserver, LifecycleState, TracingObserver};
pub use output::ProcessOutput;
pub use server::{LaunchError, StopError};

pub(crate) const IDENTITY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::identity");
pub(crate) const LAYOUT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::layout");
pub(crate) const BINARIES_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::binaries");
pub(crate) const INITDB_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::initdb");
pub(crate) const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");
pub(crate) const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");
pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Starts a non-persistent instance with the default configuration.
///
/// # Errors
///
/// See [`PgConfig::start`].
pub fn start() -> Result<PgInstance, StartError> {
    PgConfig::new().start()
}

/// Starts a persistent instance rooted at `dir`, reusing any cluster already
/// there.
///
/// # Errors
///
/// See [`PgConfig::start`].
pub fn start_persistent(dir: impl Into<PathBuf>) -> Result<PgInstance, StartError> {
    PgConfig::new().with_data_dir(dir).persistent().start()
}

#[cfg(test)]
mod tests;
