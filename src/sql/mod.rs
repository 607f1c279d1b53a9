//! Safe SQL builder: identifiers from class definitions only, values as parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;
