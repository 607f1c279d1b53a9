//! Site routes. Every path not claimed by another router is a site page.

use crate::handlers::site::serve_site;
use crate::state::AppState;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body, uploads included.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

pub fn site_routes(state: AppState) -> Router {
    Router::new()
        .fallback(serve_site)
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)))
        .with_state(state)
}
