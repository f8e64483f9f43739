//! Command-line runtime for `pgtest`.
//!
//! The binary starts one PostgreSQL instance, writes a JSON line describing
//! how to reach it to stdout, then blocks until a termination signal arrives
//! and stops the instance. Logs go to stderr so the report can be piped
//! straight into another tool.

use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use pgtest::{StartError, StopError};
use thiserror::Error;
use tracing::info;

mod cli;
mod logging;
mod report;
mod shutdown;
mod telemetry;

use cli::Cli;
pub use logging::{DEFAULT_LOG_FILTER, LogFormat, LogSettings};
use report::InstanceReport;
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal, TERMINATION_SIGNALS};
pub use telemetry::{TelemetryError, TelemetryHandle};

const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cli");

/// Errors that end a CLI run.
#[derive(Debug, Error)]
pub enum CliError {
    /// Logging could not be configured.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The instance failed to start.
    #[error(transparent)]
    Start(#[from] StartError),
    /// The instance report could not be written.
    #[error("failed to write instance details: {0}")]
    Report(#[source] io::Error),
    /// Waiting for a termination signal failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    /// The instance failed to stop cleanly.
    #[error(transparent)]
    Stop(#[from] StopError),
}

/// Runs the CLI with the given arguments and streams.
///
/// Help and version requests are written to `stdout` and succeed; every
/// other failure is written to `stderr` and reported as
/// [`ExitCode::FAILURE`]. `shutdown` should already be listening, so a
/// signal sent while the server boots is not lost.
pub fn run<I, W, E>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    shutdown: &mut dyn ShutdownSignal,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let informational = matches!(
                error.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            );
            let written = if informational {
                write!(stdout, "{}", error.render()).map(|()| ExitCode::SUCCESS)
            } else {
                write!(stderr, "{}", error.render()).map(|()| ExitCode::FAILURE)
            };
            return written.unwrap_or(ExitCode::FAILURE);
        }
    };
    match execute(&cli, stdout, shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // stderr is the last resort; a failed write has nowhere to go.
            drop(writeln!(stderr, "pgtest: {error}"));
            ExitCode::FAILURE
        }
    }
}

fn execute<W: Write>(
    cli: &Cli,
    stdout: &mut W,
    shutdown: &mut dyn ShutdownSignal,
) -> Result<(), CliError> {
    telemetry::initialise(&cli.log_settings())?;
    let mut instance = cli.config().start()?;
    InstanceReport::new(&instance)
        .write_to(stdout)
        .map_err(CliError::Report)?;
    let signal = shutdown.wait()?;
    info!(
        target: CLI_TARGET,
        signal,
        root = %instance.root().display(),
        "stopping PostgreSQL instance"
    );
    instance.stop()?;
    Ok(())
}
