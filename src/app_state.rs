use std::sync::Arc;

use crate::models::api::UploadLimits;
use crate::store::RecordStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub limits: UploadLimits,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, limits: UploadLimits) -> Self {
        Self { store, limits }
    }
}
