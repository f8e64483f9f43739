//! Crate-level test suites for the instance lifecycle.

pub(crate) mod support;
