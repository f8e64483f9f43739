//! Lifecycle states and the observer notified as an instance moves through
//! them.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::LIFECYCLE_TARGET;
use crate::bootstrap::CatalogError;
use crate::initdb::InitOutcome;

/// Phase an instance is in.
///
/// A successful start walks the states in declaration order. A failed start
/// jumps from the failing phase straight to [`LifecycleState::Stopping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Directories and the execution identity are being prepared.
    Provisioning,
    /// The cluster is being initialised, or found to exist already.
    Initializing,
    /// The server process is being launched.
    Starting,
    /// Waiting for the server to accept connections.
    AwaitingReady,
    /// The server is up and the test database exists.
    Ready,
    /// The server is being shut down.
    Stopping,
    /// Terminal state; nothing is running.
    Stopped,
}

impl LifecycleState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Provisioning, Self::Initializing)
                | (Self::Initializing, Self::Starting)
                | (Self::Starting, Self::AwaitingReady)
                | (Self::AwaitingReady, Self::Ready)
                | (
                    Self::Provisioning
                        | Self::Initializing
                        | Self::Starting
                        | Self::AwaitingReady
                        | Self::Ready,
                    Self::Stopping
                )
                | (Self::Stopping, Self::Stopped)
        )
    }

    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Lower-case label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Initializing => "initializing",
            Self::Starting => "starting",
            Self::AwaitingReady => "awaiting_ready",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Receives lifecycle events from starting and stopping instances.
pub trait LifecycleObserver: Send + Sync {
    /// Invoked on every state transition.
    fn state_changed(&self, from: LifecycleState, to: LifecycleState);

    /// Invoked once the cluster initialisation step has completed.
    fn cluster_initialised(&self, outcome: InitOutcome);

    /// Invoked after each failed bootstrap attempt, numbered from one.
    fn bootstrap_attempt_failed(&self, attempt: u32, error: &CatalogError);
}

impl<T> LifecycleObserver for Arc<T>
where
    T: LifecycleObserver + ?Sized,
{
    fn state_changed(&self, from: LifecycleState, to: LifecycleState) {
        (**self).state_changed(from, to);
    }

    fn cluster_initialised(&self, outcome: InitOutcome) {
        (**self).cluster_initialised(outcome);
    }

    fn bootstrap_attempt_failed(&self, attempt: u32, error: &CatalogError) {
        (**self).bootstrap_attempt_failed(attempt, error);
    }
}

/// Default observer that records events with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn state_changed(&self, from: LifecycleState, to: LifecycleState) {
        info!(
            target: LIFECYCLE_TARGET,
            event = "state_changed",
            %from,
            %to,
            "instance state changed"
        );
    }

    fn cluster_initialised(&self, outcome: InitOutcome) {
        info!(
            target: LIFECYCLE_TARGET,
            event = "cluster_initialised",
            outcome = ?outcome,
            "cluster ready"
        );
    }

    fn bootstrap_attempt_failed(&self, attempt: u32, error: &CatalogError) {
        debug!(
            target: LIFECYCLE_TARGET,
            event = "bootstrap_attempt_failed",
            attempt,
            error = %error,
            "bootstrap attempt failed"
        );
    }
}
