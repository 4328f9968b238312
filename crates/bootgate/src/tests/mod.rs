//! Test suites for the bootstrap supervisor.

pub(crate) mod support;
