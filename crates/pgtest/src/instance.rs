//! The running instance handle and its start and stop sequences.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use postgres::Client;
use thiserror::Error;
use tracing::{info, warn};

use crate::LIFECYCLE_TARGET;
use crate::binaries::{BinaryLookupError, BinaryPaths};
use crate::bootstrap::{BootstrapError, Catalog, PostgresCatalog, bootstrap};
use crate::config::PgConfig;
use crate::connection::ConnectionTarget;
use crate::identity::{ExecutionIdentity, PrivilegeError};
use crate::initdb::{InitOutcome, InitializationError, ensure_initialised};
use crate::layout::{ClusterLayout, ProvisioningError, RootCleanup};
use crate::observer::{LifecycleObserver, LifecycleState};
use crate::output::ProcessOutput;
use crate::server::{LaunchError, ServerProcess, StopError};

/// Errors raised while starting an instance.
#[derive(Debug, Error)]
pub enum StartError {
    /// The instance directories could not be prepared.
    #[error(transparent)]
    Provisioning(ProvisioningError),
    /// The account to run PostgreSQL as could not be resolved.
    #[error(transparent)]
    PrivilegeResolution(PrivilegeError),
    /// No PostgreSQL installation was found.
    #[error(transparent)]
    Binaries(BinaryLookupError),
    /// `initdb` failed.
    #[error(transparent)]
    Initialization(InitializationError),
    /// The server executable could not be started.
    #[error(transparent)]
    Launch(LaunchError),
    /// The server never became ready.
    #[error("{source}\n{output}")]
    Bootstrap {
        /// Why the server was not ready.
        #[source]
        source: BootstrapError,
        /// Server output captured before it was torn down.
        output: ProcessOutput,
    },
    /// The server was ready but the test database refused a connection.
    #[error("failed to connect to database '{database}': {source}\n{output}")]
    Connect {
        /// Test database name.
        database: String,
        /// Driver error.
        #[source]
        source: postgres::Error,
        /// Server output captured before it was torn down.
        output: ProcessOutput,
    },
}

impl StartError {
    /// Output captured from the server, when it had been launched.
    #[must_use]
    pub const fn server_output(&self) -> Option<&ProcessOutput> {
        match self {
            Self::Bootstrap { output, .. } | Self::Connect { output, .. } => Some(output),
            _ => None,
        }
    }
}

impl From<ProvisioningError> for StartError {
    fn from(error: ProvisioningError) -> Self {
        Self::Provisioning(error)
    }
}

impl From<PrivilegeError> for StartError {
    fn from(error: PrivilegeError) -> Self {
        Self::PrivilegeResolution(error)
    }
}

impl From<BinaryLookupError> for StartError {
    fn from(error: BinaryLookupError) -> Self {
        Self::Binaries(error)
    }
}

impl From<InitializationError> for StartError {
    fn from(error: InitializationError) -> Self {
        Self::Initialization(error)
    }
}

impl From<LaunchError> for StartError {
    fn from(error: LaunchError) -> Self {
        Self::Launch(error)
    }
}

/// A running PostgreSQL server owned by a test.
///
/// The instance holds an open connection to the test database for as long as
/// it is running. [`PgInstance::stop`] shuts the server down and, unless the
/// instance is persistent, removes its root directory. Dropping a running
/// instance stops it too, logging rather than returning any error.
pub struct PgInstance {
    layout: ClusterLayout,
    target: ConnectionTarget,
    database: String,
    persistent: bool,
    init_outcome: InitOutcome,
    server: Option<ServerProcess>,
    client: Option<Client>,
    state: LifecycleState,
    observer: Arc<dyn LifecycleObserver>,
}

impl PgInstance {
    pub(crate) fn start(
        config: PgConfig,
        observer: Arc<dyn LifecycleObserver>,
    ) -> Result<Self, StartError> {
        let mut startup = Startup::new(Arc::clone(&observer));
        match startup.run(&config) {
            Ok(ready) => Ok(Self {
                layout: ready.layout,
                target: ready.target,
                database: config.database().to_owned(),
                persistent: config.is_persistent(),
                init_outcome: ready.init_outcome,
                server: Some(ready.server),
                client: Some(ready.client),
                state: startup.state,
                observer,
            }),
            Err(error) => Err(startup.fail(error)),
        }
    }

    /// Shuts the server down and cleans up.
    ///
    /// Closes the test connection, sends SIGINT and waits for the server
    /// without a timeout, then removes the root directory unless the
    /// instance is persistent. The directory is removed even when signalling
    /// or waiting fails. Stopping a stopped instance does nothing.
    ///
    /// # Errors
    ///
    /// Returns a [`StopError`] when the server cannot be signalled or
    /// reaped, or when it had already died or stopped with a failure status.
    /// The instance is considered stopped regardless.
    pub fn stop(&mut self) -> Result<(), StopError> {
        if self.state.is_terminal() {
            return Ok(());
        }
        transition(self.observer.as_ref(), &mut self.state, LifecycleState::Stopping);
        let result = {
            let _cleanup = RootCleanup::new(self.layout.root(), self.persistent);
            close_client(self.client.take());
            self.server
                .take()
                .map_or(Ok(()), |server| server.shutdown().map(drop))
        };
        transition(self.observer.as_ref(), &mut self.state, LifecycleState::Stopped);
        result
    }

    /// Connection to the test database, until the instance stops.
    pub fn client(&mut self) -> Option<&mut Client> {
        self.client.as_mut()
    }

    /// Opens an additional connection to the test database.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the server rejects the connection.
    pub fn connect(&self) -> Result<Client, postgres::Error> {
        self.target.connect(&self.database)
    }

    /// Driver configuration for the test database.
    #[must_use]
    pub fn connection_config(&self) -> postgres::Config {
        self.target.config(&self.database)
    }

    /// Connection string for the test database.
    #[must_use]
    pub fn connection_url(&self) -> String {
        self.target.url(&self.database)
    }

    /// Instance root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Cluster data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        self.layout.data_dir()
    }

    /// Directory holding the server's unix socket.
    #[must_use]
    pub fn socket_dir(&self) -> &Path {
        self.layout.socket_dir()
    }

    /// Test database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Role used for connections.
    #[must_use]
    pub fn user(&self) -> &str {
        self.target.user()
    }

    /// Server process id, while it is running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.server.as_ref().map(ServerProcess::pid)
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether this start ran `initdb` or reused an existing cluster.
    #[must_use]
    pub const fn init_outcome(&self) -> InitOutcome {
        self.init_outcome
    }

    /// Whether the root directory survives [`PgInstance::stop`].
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        self.persistent
    }
}

impl fmt::Debug for PgInstance {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PgInstance")
            .field("root", &self.layout.root())
            .field("database", &self.database)
            .field("user", &self.target.user())
            .field("pid", &self.pid())
            .field("persistent", &self.persistent)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for PgInstance {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            warn!(
                target: LIFECYCLE_TARGET,
                root = %self.layout.root().display(),
                error = %error,
                "failed to stop PostgreSQL instance on drop"
            );
        }
    }
}

/// Everything a successful start hands to the new instance.
struct Ready {
    layout: ClusterLayout,
    target: ConnectionTarget,
    init_outcome: InitOutcome,
    server: ServerProcess,
    client: Client,
}

/// Tracks state while an instance is being started.
struct Startup {
    observer: Arc<dyn LifecycleObserver>,
    state: LifecycleState,
    root: Option<PathBuf>,
}

impl Startup {
    fn new(observer: Arc<dyn LifecycleObserver>) -> Self {
        Self {
            observer,
            state: LifecycleState::Provisioning,
            root: None,
        }
    }

    fn advance(&mut self, next: LifecycleState) {
        transition(self.observer.as_ref(), &mut self.state, next);
    }

    fn run(&mut self, config: &PgConfig) -> Result<Ready, StartError> {
        let identity = ExecutionIdentity::resolve()?;
        let layout = ClusterLayout::provision(config.data_dir(), &identity)?;
        self.root = Some(layout.root().to_path_buf());
        let binaries = BinaryPaths::locate(config.bin_dir())?;

        self.advance(LifecycleState::Initializing);
        let init_outcome = ensure_initialised(&binaries, &layout, &identity)?;
        self.observer.cluster_initialised(init_outcome);

        self.advance(LifecycleState::Starting);
        let mut server =
            ServerProcess::launch(&binaries, &layout, &identity, config.server_args())?;

        self.advance(LifecycleState::AwaitingReady);
        let target = ConnectionTarget::new(layout.socket_dir(), identity.user());
        let mut catalog = PostgresCatalog::new(target.clone());
        let ready = bootstrap(
            &mut catalog,
            &mut server,
            config.database(),
            config.bootstrap_retry(),
            self.observer.as_ref(),
        );
        if let Err(error) = catalog.close() {
            warn!(
                target: LIFECYCLE_TARGET,
                error = %error,
                "failed to close administrative connection"
            );
        }
        if let Err(source) = ready {
            let output = self.abort(server);
            return Err(StartError::Bootstrap { source, output });
        }

        let client = match target.connect(config.database()) {
            Ok(client) => client,
            Err(source) => {
                let output = self.abort(server);
                return Err(StartError::Connect {
                    database: config.database().to_owned(),
                    source,
                    output,
                });
            }
        };

        self.advance(LifecycleState::Ready);
        info!(
            target: LIFECYCLE_TARGET,
            root = %layout.root().display(),
            socket_dir = %layout.socket_dir().display(),
            database = config.database(),
            pid = server.pid(),
            "PostgreSQL instance ready"
        );
        Ok(Ready {
            layout,
            target,
            init_outcome,
            server,
            client,
        })
    }

    fn abort(&mut self, server: ServerProcess) -> ProcessOutput {
        self.advance(LifecycleState::Stopping);
        server.abort()
    }

    fn fail(&mut self, error: StartError) -> StartError {
        if self.state != LifecycleState::Stopping {
            self.advance(LifecycleState::Stopping);
        }
        self.advance(LifecycleState::Stopped);
        match &self.root {
            Some(root) => warn!(
                target: LIFECYCLE_TARGET,
                root = %root.display(),
                error = %error,
                "PostgreSQL instance failed to start; directory kept for inspection"
            ),
            None => warn!(
                target: LIFECYCLE_TARGET,
                error = %error,
                "PostgreSQL instance failed to start"
            ),
        }
        error
    }
}

fn transition(observer: &dyn LifecycleObserver, state: &mut LifecycleState, next: LifecycleState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal lifecycle transition {state} -> {next}"
    );
    observer.state_changed(*state, next);
    *state = next;
}

fn close_client(client: Option<Client>) {
    if let Some(Err(error)) = client.map(Client::close) {
        warn!(
            target: LIFECYCLE_TARGET,
            error = %error,
            "failed to close test database connection"
        );
    }
}
