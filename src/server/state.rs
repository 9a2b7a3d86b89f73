use std::sync::Arc;

use crate::facade::ContractFacade;

/// Application state for the HTTP server: a single shared handle to the
/// Facade (§4.G). Handlers hold no state of their own.
#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<ContractFacade>,
}

impl AppState {
    pub fn new(facade: Arc<ContractFacade>) -> Self {
        Self { facade }
    }
}
