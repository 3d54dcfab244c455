//! Application state for the API server

use crate::{BulkZip, Config};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; both fields are `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// The running service
    pub service: Arc<BulkZip>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(service: Arc<BulkZip>) -> Self {
        let config = service.config.clone();
        Self { service, config }
    }
}
