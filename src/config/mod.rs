pub mod parser;
pub mod schema;
pub mod settings;
pub mod store;

pub use schema::{cardinality, Cardinality};
pub use settings::Settings;
pub use store::{ConfigStore, ConfigValue};
