use std::sync::Arc;

use crate::services::queue::JobQueueManager;
use crate::services::store::JobStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: JobQueueManager,
    pub store: Arc<dyn JobStore>,
}

impl AppState {
    pub fn new(manager: JobQueueManager) -> Self {
        let store = Arc::clone(manager.store());
        Self { manager, store }
    }
}
