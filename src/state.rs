//! Shared application state for all routes. Sites are built lazily, one per tenant key.

use crate::tenant::InstanceRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<InstanceRegistry>,
}

impl AppState {
    pub fn new(registry: InstanceRegistry) -> Self {
        AppState {
            registry: Arc::new(registry),
        }
    }
}
