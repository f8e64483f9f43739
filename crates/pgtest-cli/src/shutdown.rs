//! Waiting for the signal that ends a CLI run.
//!
//! Handlers are registered before the instance starts. A signal that arrives
//! while PostgreSQL is still booting stays pending and is consumed by the
//! first [`ShutdownSignal::wait`], so the instance is stopped properly instead
//! of being orphaned by a dying CLI.

use std::ffi::c_int;
use std::fmt;
use std::io;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;

/// Signals that stop the instance.
pub const TERMINATION_SIGNALS: [c_int; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Source of the request to stop the instance.
pub trait ShutdownSignal {
    /// Blocks until the instance should stop and returns the signal number
    /// that asked for it.
    ///
    /// # Errors
    ///
    /// Fails when the listener can no longer deliver signals.
    fn wait(&mut self) -> Result<c_int, ShutdownError>;
}

/// Errors raised by signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Registering the handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The listener was closed before any signal arrived.
    #[error("signal listener closed before a termination signal arrived")]
    Closed,
}

/// Listener for process signals, registered when constructed.
pub struct SystemShutdownSignal {
    signals: Signals,
}

impl SystemShutdownSignal {
    /// Registers handlers for [`TERMINATION_SIGNALS`].
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] when registration fails.
    pub fn install() -> Result<Self, ShutdownError> {
        Self::for_signals(&TERMINATION_SIGNALS)
    }

    /// Registers handlers for an explicit set of signals.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] when registration fails, for
    /// example for a signal that cannot be caught.
    pub fn for_signals(signals: &[c_int]) -> Result<Self, ShutdownError> {
        Signals::new(signals)
            .map(|registered| Self {
                signals: registered,
            })
            .map_err(|source| ShutdownError::Install { source })
    }
}

impl fmt::Debug for SystemShutdownSignal {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SystemShutdownSignal")
            .finish_non_exhaustive()
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&mut self) -> Result<c_int, ShutdownError> {
        self.signals.forever().next().ok_or(ShutdownError::Closed)
    }
}
