//! CLI entrypoint for `pgtest`.
//!
//! Registers the termination signal handlers first, then delegates to
//! [`pgtest_cli::run`] with the process arguments and the standard streams.

use std::io::{self, Write};
use std::process::ExitCode;

use pgtest_cli::SystemShutdownSignal;

fn main() -> ExitCode {
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    match SystemShutdownSignal::install() {
        Ok(mut shutdown) => {
            pgtest_cli::run(std::env::args_os(), &mut stdout, &mut stderr, &mut shutdown)
        }
        Err(error) => {
            drop(writeln!(stderr, "pgtest: {error}"));
            ExitCode::FAILURE
        }
    }
}
