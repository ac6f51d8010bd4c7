use crate::session::ConciergeHandle;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the running voice concierge
    pub concierge: ConciergeHandle,
}

impl AppState {
    pub fn new(concierge: ConciergeHandle) -> Self {
        Self { concierge }
    }
}
