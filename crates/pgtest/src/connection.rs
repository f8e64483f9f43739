//! Addressing the server through its unix socket.

use std::path::{Path, PathBuf};

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use postgres::{Client, NoTls};

/// Port the server listens on; only used to name the socket file.
pub const DEFAULT_PORT: u16 = 5432;

/// Database every cluster ships with, used for administrative work.
pub const ADMIN_DATABASE: &str = "postgres";

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    socket_dir: PathBuf,
    user: String,
    port: u16,
}

impl ConnectionTarget {
    /// Targets the socket in `socket_dir` as role `user`.
    #[must_use]
    pub fn new(socket_dir: impl Into<PathBuf>, user: impl Into<String>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            user: user.into(),
            port: DEFAULT_PORT,
        }
    }

    /// Directory containing the `.s.PGSQL.<port>` socket.
    #[must_use]
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// Role used to authenticate.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Driver configuration for `database`.
    #[must_use]
    pub fn config(&self, database: &str) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host_path(&self.socket_dir)
            .port(self.port)
            .user(&self.user)
            .dbname(database)
            .application_name(env!("CARGO_PKG_NAME"));
        config
    }

    /// Opens a new connection to `database`.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the server rejects or cannot accept the
    /// connection.
    pub fn connect(&self, database: &str) -> Result<Client, postgres::Error> {
        self.config(database).connect(NoTls)
    }

    /// libpq-style URL for drivers that only take connection strings.
    #[must_use]
    pub fn url(&self, database: &str) -> String {
        let host = self.socket_dir.to_string_lossy();
        format!(
            "postgresql://{}@/{}?host={}&port={}",
            utf8_percent_encode(&self.user, NON_ALPHANUMERIC),
            utf8_percent_encode(database, NON_ALPHANUMERIC),
            utf8_percent_encode(&host, NON_ALPHANUMERIC),
            self.port
        )
    }
}

#[cfg(test)]
mod tests {
    use postgres::config::Host;

    use super::*;

    #[test]
    fn config_points_at_the_socket_directory() {
        let target = ConnectionTarget::new("/tmp/pgtest1/sock", "postgres");
        let config = target.config("test");

        assert_eq!(config.get_hosts(), [Host::Unix(PathBuf::from("/tmp/pgtest1/sock"))]);
        assert_eq!(config.get_ports(), [DEFAULT_PORT]);
        assert_eq!(config.get_user(), Some("postgres"));
        assert_eq!(config.get_dbname(), Some("test"));
    }

    #[test]
    fn url_encodes_the_socket_path() {
        let target = ConnectionTarget::new("/tmp/pg test/sock", "alice");
        assert_eq!(
            target.url("test"),
            "postgresql://alice@/test?host=%2Ftmp%2Fpg%20test%2Fsock&port=5432"
        );
    }
}
