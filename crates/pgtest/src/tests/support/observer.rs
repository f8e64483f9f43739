//! Test double for [`LifecycleObserver`] that records events for assertions.

use std::sync::Mutex;

use crate::bootstrap::CatalogError;
use crate::initdb::InitOutcome;
use crate::observer::{LifecycleObserver, LifecycleState};

/// Lifecycle events tracked during a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LifecycleEvent {
    /// State transition.
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    /// Cluster initialisation finished.
    ClusterInitialised(InitOutcome),
    /// A bootstrap attempt failed.
    BootstrapAttemptFailed(u32),
}

/// Records lifecycle events for assertions.
#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingObserver {
    /// Captures a copy of the recorded events.
    pub(crate) fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .expect("observer mutex poisoned")
            .clone()
    }

    /// Target states in the order they were entered.
    pub(crate) fn states(&self) -> Vec<LifecycleState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LifecycleEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    /// Numbers of the failed bootstrap attempts.
    pub(crate) fn failed_attempts(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LifecycleEvent::BootstrapAttemptFailed(attempt) => Some(attempt),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .expect("observer mutex poisoned")
            .push(event);
    }
}

impl LifecycleObserver for RecordingObserver {
    fn state_changed(&self, from: LifecycleState, to: LifecycleState) {
        self.record(LifecycleEvent::StateChanged { from, to });
    }

    fn cluster_initialised(&self, outcome: InitOutcome) {
        self.record(LifecycleEvent::ClusterInitialised(outcome));
    }

    fn bootstrap_attempt_failed(&self, attempt: u32, _error: &CatalogError) {
        self.record(LifecycleEvent::BootstrapAttemptFailed(attempt));
    }
}
