//! Command-line argument definitions.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;
use pgtest::{DEFAULT_DATABASE, PgConfig};

use crate::logging::{DEFAULT_LOG_FILTER, LogFormat, LogSettings};

/// Starts a throwaway PostgreSQL server, prints how to reach it and keeps it
/// running until interrupted.
#[derive(Parser, Debug)]
#[command(name = "pgtest", version)]
pub(crate) struct Cli {
    /// Directory containing `initdb` and `postgres`.
    #[arg(long, value_name = "DIR")]
    pub(crate) bin_dir: Option<PathBuf>,
    /// Instance root; a private temporary directory when omitted.
    #[arg(long, value_name = "DIR")]
    pub(crate) data_dir: Option<PathBuf>,
    /// Keeps the instance root after shutdown.
    #[arg(long)]
    pub(crate) persistent: bool,
    /// Name of the database created for tests.
    #[arg(long, value_name = "NAME", default_value = DEFAULT_DATABASE)]
    pub(crate) database: String,
    /// Tracing filter directives.
    #[arg(long, env = "PGTEST_LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub(crate) log_filter: String,
    /// Log output format (`json` or `compact`).
    #[arg(long, env = "PGTEST_LOG_FORMAT", default_value_t = LogFormat::default())]
    pub(crate) log_format: LogFormat,
    /// Extra arguments appended to the `postgres` command line.
    #[arg(last = true, value_name = "SERVER_ARGS")]
    pub(crate) server_args: Vec<OsString>,
}

impl Cli {
    /// Logging configuration described by the arguments.
    pub(crate) fn log_settings(&self) -> LogSettings {
        LogSettings::new(self.log_filter.as_str(), self.log_format)
    }

    /// Instance configuration described by the arguments.
    pub(crate) fn config(&self) -> PgConfig {
        let mut config = PgConfig::new()
            .with_database(self.database.as_str())
            .with_server_args(self.server_args.iter().cloned());
        if let Some(dir) = &self.bin_dir {
            config = config.with_bin_dir(dir);
        }
        if let Some(dir) = &self.data_dir {
            config = config.with_data_dir(dir);
        }
        if self.persistent {
            config = config.persistent();
        }
        config
    }
}
