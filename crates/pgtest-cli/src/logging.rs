//! Log settings chosen on the command line.

use strum::{Display, EnumString};

/// Filter used when neither `--log-filter` nor `PGTEST_LOG_FILTER` is set.
///
/// The SQL driver logs every statement at debug and connection chatter at
/// info, so it is held to warnings unless asked for explicitly.
pub const DEFAULT_LOG_FILTER: &str = "info,postgres=warn,tokio_postgres=warn";

/// Shape of each log line written to stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event with the event fields at the top level.
    #[default]
    Json,
    /// One human-readable line per event.
    Compact,
}

/// Filter directives and output format for the CLI's subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    filter: String,
    format: LogFormat,
}

impl LogSettings {
    /// Pairs `filter` directives with an output `format`.
    #[must_use]
    pub fn new(filter: impl Into<String>, format: LogFormat) -> Self {
        Self {
            filter: filter.into(),
            format,
        }
    }

    /// `EnvFilter` directives.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Output format.
    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_FILTER, LogFormat::default())
    }
}
