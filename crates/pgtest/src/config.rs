//! Instance configuration and builder helpers.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bootstrap::RetryPolicy;
use crate::instance::{PgInstance, StartError};
use crate::observer::{LifecycleObserver, TracingObserver};

/// Database created for the test suite when no other name is given.
pub const DEFAULT_DATABASE: &str = "test";

/// Description of the instance to start.
///
/// The default configuration starts a non-persistent server in a private
/// temporary directory, using the first PostgreSQL installation found on the
/// system:
///
/// ```no_run
/// use pgtest::PgConfig;
///
/// let instance = PgConfig::new()
///     .with_server_args(["-c", "wal_level=logical"])
///     .start()?;
/// # Ok::<(), pgtest::StartError>(())
/// ```
///
/// No combination of settings is validated up front; mistakes such as a bad
/// server argument surface as start errors carrying the server's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgConfig {
    bin_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    persistent: bool,
    server_args: Vec<OsString>,
    database: String,
    retry: RetryPolicy,
}

impl PgConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bin_dir: None,
            data_dir: None,
            persistent: false,
            server_args: Vec::new(),
            database: String::from(DEFAULT_DATABASE),
            retry: RetryPolicy::default(),
        }
    }

    /// Uses the `initdb` and `postgres` executables found in `dir`.
    #[must_use]
    pub fn with_bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = Some(dir.into());
        self
    }

    /// Roots the instance at `dir` instead of a temporary directory.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Keeps the root directory when the instance stops.
    ///
    /// Combined with [`PgConfig::with_data_dir`], a later start reuses the
    /// cluster and skips `initdb`.
    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Appends arguments to the server command line.
    #[must_use]
    pub fn with_server_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.server_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Names the database created for the test suite.
    #[must_use]
    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.database = name.into();
        self
    }

    /// Replaces the readiness retry budget.
    #[must_use]
    pub fn with_bootstrap_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Binary directory override, if any.
    #[must_use]
    pub fn bin_dir(&self) -> Option<&Path> {
        self.bin_dir.as_deref()
    }

    /// Root directory override, if any.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Whether the root survives [`PgInstance::stop`].
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Extra server arguments, in order.
    #[must_use]
    pub fn server_args(&self) -> &[OsString] {
        &self.server_args
    }

    /// Test database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Readiness retry budget.
    #[must_use]
    pub const fn bootstrap_retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Starts an instance, logging lifecycle events with `tracing`.
    ///
    /// # Errors
    ///
    /// Returns a [`StartError`] describing the phase that failed. Nothing is
    /// left running on failure, but the root directory is kept for
    /// inspection.
    pub fn start(self) -> Result<PgInstance, StartError> {
        self.start_observed(TracingObserver)
    }

    /// Starts an instance that reports lifecycle events to `observer`.
    ///
    /// # Errors
    ///
    /// See [`PgConfig::start`].
    pub fn start_observed<O>(self, observer: O) -> Result<PgInstance, StartError>
    where
        O: LifecycleObserver + 'static,
    {
        PgInstance::start(self, Arc::new(observer))
    }
}

impl Default for PgConfig {
    fn default() -> Self {
        Self::new()
    }
}
