pub mod common;
pub mod site;

pub use common::common_routes;
pub use site::{site_routes, MAX_BODY_BYTES};
