//! Waits for a freshly launched server and ensures the test database exists.
//!
//! Launching `postgres` returns long before the server listens on its socket,
//! so the first connection attempts are expected to fail. Each attempt
//! connects on demand, checks `pg_database` for the test database and creates
//! it when missing. Failed attempts are retried at a fixed interval until the
//! [`RetryPolicy`] budget is spent.

use std::error::Error as StdError;
use std::fmt;
use std::process::ExitStatus;
use std::thread;
use std::time::Duration;

use postgres::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::BOOTSTRAP_TARGET;
use crate::connection::{ADMIN_DATABASE, ConnectionTarget};
use crate::observer::LifecycleObserver;
use crate::server::ServerLiveness;

/// Attempt budget for [`bootstrap`].
///
/// The default matches a server that needs up to ten seconds to come up:
/// 1000 attempts spaced 10 ms apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    /// Builds a policy; zero attempts is treated as one.
    #[must_use]
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: if attempts == 0 { 1 } else { attempts },
            interval,
        }
    }

    /// Maximum number of attempts.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Pause between consecutive attempts.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Upper bound on the time spent sleeping between attempts.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1000, Duration::from_millis(10))
    }
}

/// Catalog step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOperation {
    /// Opening the administrative connection.
    Connect,
    /// Looking the database up in `pg_database`.
    Lookup,
    /// Running `CREATE DATABASE`.
    Create,
    /// Closing the administrative connection.
    Close,
}

impl fmt::Display for CatalogOperation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connect => "connect",
            Self::Lookup => "database lookup",
            Self::Create => "database creation",
            Self::Close => "disconnect",
        };
        formatter.write_str(label)
    }
}

/// A failed catalog step.
#[derive(Debug, Error)]
#[error("{operation} failed: {source}")]
pub struct CatalogError {
    operation: CatalogOperation,
    #[source]
    source: Box<dyn StdError + Send + Sync>,
}

impl CatalogError {
    /// Wraps the error reported by `operation`.
    pub fn new(
        operation: CatalogOperation,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            operation,
            source: source.into(),
        }
    }

    /// Step that failed.
    #[must_use]
    pub const fn operation(&self) -> CatalogOperation {
        self.operation
    }
}

/// Errors raised while waiting for the server.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Every attempt failed.
    #[error("server not ready after {attempts} attempts: {source}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        source: CatalogError,
    },
    /// The server process died before accepting connections.
    #[error("server exited with {status} before accepting connections")]
    ServerExited {
        /// Exit status of the server process.
        status: ExitStatus,
        /// Attempts made before the exit was noticed.
        attempts: u32,
    },
}

/// Administrative operations the bootstrap loop relies on.
pub trait Catalog {
    /// Whether a database called `name` exists.
    ///
    /// # Errors
    ///
    /// Fails when the server cannot be reached or the query fails.
    fn database_exists(&mut self, name: &str) -> Result<bool, CatalogError>;

    /// Creates the database `name`.
    ///
    /// # Errors
    ///
    /// Fails when the server cannot be reached or the statement fails.
    fn create_database(&mut self, name: &str) -> Result<(), CatalogError>;

    /// Releases the administrative connection.
    ///
    /// # Errors
    ///
    /// Fails when the connection does not close cleanly.
    fn close(&mut self) -> Result<(), CatalogError>;
}

/// [`Catalog`] backed by a lazily opened connection to the `postgres`
/// database.
///
/// A failed operation discards the connection so the next attempt dials the
/// server again.
pub struct PostgresCatalog {
    target: ConnectionTarget,
    client: Option<Client>,
}

impl PostgresCatalog {
    /// Builds a catalog that connects through `target`.
    #[must_use]
    pub const fn new(target: ConnectionTarget) -> Self {
        Self {
            target,
            client: None,
        }
    }

    fn with_client<T>(
        &mut self,
        operation: CatalogOperation,
        run: impl FnOnce(&mut Client) -> Result<T, postgres::Error>,
    ) -> Result<T, CatalogError> {
        let mut client = match self.client.take() {
            Some(client) => client,
            None => self
                .target
                .connect(ADMIN_DATABASE)
                .map_err(|source| CatalogError::new(CatalogOperation::Connect, source))?,
        };
        let value = run(&mut client).map_err(|source| CatalogError::new(operation, source))?;
        self.client = Some(client);
        Ok(value)
    }
}

impl fmt::Debug for PostgresCatalog {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PostgresCatalog")
            .field("target", &self.target)
            .field("connected", &self.client.is_some())
            .finish()
    }
}

impl Catalog for PostgresCatalog {
    fn database_exists(&mut self, name: &str) -> Result<bool, CatalogError> {
        self.with_client(CatalogOperation::Lookup, |client| {
            client
                .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&name])
                .map(|row| row.is_some())
        })
    }

    fn create_database(&mut self, name: &str) -> Result<(), CatalogError> {
        let statement = format!("CREATE DATABASE {}", quote_identifier(name));
        self.with_client(CatalogOperation::Create, |client| {
            client.batch_execute(&statement)
        })
    }

    fn close(&mut self) -> Result<(), CatalogError> {
        self.client.take().map_or(Ok(()), |client| {
            client
                .close()
                .map_err(|source| CatalogError::new(CatalogOperation::Close, source))
        })
    }
}

/// Quotes `name` as an SQL identifier.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Polls until `database` exists, creating it if needed.
///
/// The existence check always runs before creation, so a database left by an
/// earlier persistent run is reused rather than tripping a duplicate error.
/// The calling thread sleeps between attempts; no sleep follows the final
/// one. Returns the number of attempts used.
///
/// # Errors
///
/// Returns [`BootstrapError::ServerExited`] as soon as the server is seen to
/// have exited, or [`BootstrapError::Exhausted`] once the budget is spent.
pub fn bootstrap<C, S>(
    catalog: &mut C,
    server: &mut S,
    database: &str,
    policy: RetryPolicy,
    observer: &dyn LifecycleObserver,
) -> Result<u32, BootstrapError>
where
    C: Catalog + ?Sized,
    S: ServerLiveness + ?Sized,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        if let Some(status) = server.exit_status() {
            return Err(BootstrapError::ServerExited {
                status,
                attempts: attempt - 1,
            });
        }
        match ensure_database(catalog, database) {
            Ok(created) => {
                info!(
                    target: BOOTSTRAP_TARGET,
                    database,
                    created,
                    attempts = attempt,
                    "test database ready"
                );
                return Ok(attempt);
            }
            Err(error) => {
                observer.bootstrap_attempt_failed(attempt, &error);
                if attempt >= policy.attempts() {
                    return Err(BootstrapError::Exhausted {
                        attempts: attempt,
                        source: error,
                    });
                }
                debug!(
                    target: BOOTSTRAP_TARGET,
                    attempt,
                    error = %error,
                    "server not ready yet"
                );
                thread::sleep(policy.interval());
            }
        }
    }
}

/// Returns whether the database had to be created.
fn ensure_database<C>(catalog: &mut C, database: &str) -> Result<bool, CatalogError>
where
    C: Catalog + ?Sized,
{
    if catalog.database_exists(database)? {
        return Ok(false);
    }
    catalog.create_database(database)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::os::unix::process::ExitStatusExt;
    use std::time::Instant;

    use mockall::{Sequence, mock};
    use rstest::rstest;

    use super::*;
    use crate::tests::support::RecordingObserver;

    mock! {
        Catalog {}
        impl Catalog for Catalog {
            fn database_exists(&mut self, name: &str) -> Result<bool, CatalogError>;
            fn create_database(&mut self, name: &str) -> Result<(), CatalogError>;
            fn close(&mut self) -> Result<(), CatalogError>;
        }
    }

    #[derive(Default)]
    struct Liveness {
        exit_after: Option<u32>,
        polls: u32,
    }

    impl ServerLiveness for Liveness {
        fn exit_status(&mut self) -> Option<ExitStatus> {
            self.polls += 1;
            match self.exit_after {
                Some(limit) if self.polls > limit => Some(ExitStatus::from_raw(1 << 8)),
                _ => None,
            }
        }
    }

    fn refused() -> CatalogError {
        CatalogError::new(
            CatalogOperation::Connect,
            io::Error::new(io::ErrorKind::NotFound, "no such socket"),
        )
    }

    const FAST: RetryPolicy = RetryPolicy::new(5, Duration::from_millis(1));

    #[test]
    fn existing_database_is_not_recreated() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_database_exists()
            .withf(|name| name == "test")
            .once()
            .returning(|_| Ok(true));
        catalog.expect_create_database().never();

        let attempts = bootstrap(
            &mut catalog,
            &mut Liveness::default(),
            "test",
            FAST,
            &RecordingObserver::default(),
        )
        .expect("bootstrap succeeds");

        assert_eq!(attempts, 1);
    }

    #[test]
    fn missing_database_is_created_after_the_lookup() {
        let mut sequence = Sequence::new();
        let mut catalog = MockCatalog::new();
        catalog
            .expect_database_exists()
            .once()
            .in_sequence(&mut sequence)
            .returning(|_| Ok(false));
        catalog
            .expect_create_database()
            .withf(|name| name == "test")
            .once()
            .in_sequence(&mut sequence)
            .returning(|_| Ok(()));

        bootstrap(
            &mut catalog,
            &mut Liveness::default(),
            "test",
            FAST,
            &RecordingObserver::default(),
        )
        .expect("bootstrap succeeds");
    }

    #[test]
    fn retries_until_the_server_accepts_connections() {
        let mut calls = 0;
        let mut catalog = MockCatalog::new();
        catalog.expect_database_exists().times(3).returning(move |_| {
            calls += 1;
            if calls < 3 { Err(refused()) } else { Ok(true) }
        });
        let observer = RecordingObserver::default();

        let attempts = bootstrap(&mut catalog, &mut Liveness::default(), "test", FAST, &observer)
            .expect("third attempt succeeds");

        assert_eq!(attempts, 3);
        assert_eq!(observer.failed_attempts(), vec![1, 2]);
    }

    #[rstest]
    #[case::single(1)]
    #[case::several(4)]
    fn exhausting_the_budget_reports_the_last_error(#[case] budget: u32) {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_database_exists()
            .times(usize::try_from(budget).expect("budget fits usize"))
            .returning(|_| Err(refused()));
        let policy = RetryPolicy::new(budget, Duration::from_millis(1));

        let error = bootstrap(
            &mut catalog,
            &mut Liveness::default(),
            "test",
            policy,
            &RecordingObserver::default(),
        )
        .expect_err("budget is exhausted");

        match error {
            BootstrapError::Exhausted { attempts, source } => {
                assert_eq!(attempts, budget);
                assert_eq!(source.operation(), CatalogOperation::Connect);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn exhaustion_returns_within_the_budget() {
        let policy = RetryPolicy::new(3, Duration::from_millis(50));
        let mut catalog = MockCatalog::new();
        catalog
            .expect_database_exists()
            .returning(|_| Err(refused()));

        let started = Instant::now();
        let result = bootstrap(
            &mut catalog,
            &mut Liveness::default(),
            "test",
            policy,
            &RecordingObserver::default(),
        );
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(BootstrapError::Exhausted { .. })));
        assert!(
            elapsed < policy.budget(),
            "bootstrap took {elapsed:?}, budget {:?}",
            policy.budget()
        );
    }

    #[test]
    fn dead_server_stops_the_loop_early() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_database_exists()
            .times(2)
            .returning(|_| Err(refused()));
        let mut liveness = Liveness {
            exit_after: Some(2),
            polls: 0,
        };

        let error = bootstrap(
            &mut catalog,
            &mut liveness,
            "test",
            RetryPolicy::new(100, Duration::from_millis(1)),
            &RecordingObserver::default(),
        )
        .expect_err("server exit is fatal");

        match error {
            BootstrapError::ServerExited { status, attempts } => {
                assert_eq!(status.code(), Some(1));
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert_eq!(policy.attempts(), 1);
        assert_eq!(policy.budget(), Duration::from_millis(10));
        assert_eq!(RetryPolicy::default().budget(), Duration::from_secs(10));
    }

    #[rstest]
    #[case("test", "\"test\"")]
    #[case("we\"ird", "\"we\"\"ird\"")]
    fn quotes_identifiers(#[case] name: &str, #[case] quoted: &str) {
        assert_eq!(quote_identifier(name), quoted);
    }
}
