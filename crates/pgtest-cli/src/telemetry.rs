//! Installs the CLI's tracing subscriber.
//!
//! Only the first call configures anything. Every later call gets a handle
//! to the settings already in force, which is what keeps repeated in-process
//! runs (the CLI's own tests among them) from fighting over the global
//! dispatcher.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::logging::{LogFormat, LogSettings};

const TELEMETRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::telemetry");

static ACTIVE: OnceCell<LogSettings> = OnceCell::new();

/// Proof that logging is configured.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryHandle {
    settings: &'static LogSettings,
}

impl TelemetryHandle {
    /// Settings of the subscriber actually installed.
    #[must_use]
    pub const fn settings(&self) -> &'static LogSettings {
        self.settings
    }
}

/// Errors raised while configuring logging.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directives do not parse.
    #[error("invalid log filter '{expression}': {message}")]
    Filter {
        /// Directives as given.
        expression: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Another subscriber was installed outside this module.
    #[error("failed to install the log subscriber: {0}")]
    Install(#[source] TryInitError),
}

/// Installs a stderr subscriber for `settings` unless one is already active.
///
/// # Errors
///
/// Fails when the filter does not parse or a foreign subscriber already owns
/// the global dispatcher.
pub fn initialise(settings: &LogSettings) -> Result<TelemetryHandle, TelemetryError> {
    let active = ACTIVE.get_or_try_init(|| {
        install(settings)?;
        Ok::<_, TelemetryError>(settings.clone())
    })?;
    if active != settings {
        debug!(
            target: TELEMETRY_TARGET,
            active_filter = active.filter(),
            ignored_filter = settings.filter(),
            "logging already configured; keeping the first settings"
        );
    }
    Ok(TelemetryHandle { settings: active })
}

fn filter_for(settings: &LogSettings) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(settings.filter()).map_err(|error| TelemetryError::Filter {
        expression: settings.filter().to_owned(),
        message: error.to_string(),
    })
}

fn install(settings: &LogSettings) -> Result<(), TelemetryError> {
    let filter = filter_for(settings)?;
    // stdout carries the instance report.
    let lines = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true);
    let lines: Box<dyn Layer<Registry> + Send + Sync> = match settings.format() {
        LogFormat::Json => lines.json().flatten_event(true).boxed(),
        LogFormat::Compact => lines.compact().boxed(),
    };
    tracing_subscriber::registry()
        .with(lines)
        .with(filter)
        .try_init()
        .map_err(TelemetryError::Install)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_filters_name_the_directive() {
        let settings = LogSettings::new("pgtest=loud", LogFormat::Compact);

        let error = filter_for(&settings).expect_err("malformed filter is rejected");

        assert!(error.to_string().contains("pgtest=loud"), "{error}");
    }

    #[test]
    fn later_calls_share_the_first_settings() {
        let first = initialise(&LogSettings::new("warn", LogFormat::Json))
            .expect("logging is configured");
        let second = initialise(&LogSettings::new("debug", LogFormat::Compact))
            .expect("repeat call succeeds");

        assert!(std::ptr::eq(first.settings(), second.settings()));
    }
}
