//! Common test utilities for bulkzip end-to-end tests

#[allow(dead_code)]
pub mod fixtures;

pub use fixtures::*;
