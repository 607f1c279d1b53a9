//! HTTP handlers: translate axum requests into site requests and back.

pub mod site;
pub use site::*;
