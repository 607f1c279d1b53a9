pub mod tenant;

pub use tenant::SiteKey;
