//! Shared helpers for the crate-level test suites.

mod observer;
mod scripts;

pub(crate) use observer::{LifecycleEvent, RecordingObserver};
pub(crate) use scripts::{
    CRASHING_POSTGRES, FAILING_INITDB, FakeInstallation, MARKING_INITDB, SILENT_POSTGRES,
};
