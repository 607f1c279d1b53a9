//! Data classes: the catalog of implementations compiled into the binary and
//! the per-factory registry of loaded classes.

mod catalog;
mod registry;
mod table;

pub use catalog::{ClassCatalog, ClassDef, Loader};
pub use registry::{ClassRegistry, ClassRequest, ManagedClass};
pub use table::TableClass;

use crate::error::StoreError;
use crate::factory::Factory;
use crate::store::{Match, Row, Select, Store};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context handed to every data class call: the owning factory and its
/// database. One class definition serves every site this way.
#[derive(Clone, Copy)]
pub struct ClassCx<'a> {
    pub factory: &'a Factory,
    pub db: &'a dyn Store,
}

/// Which columns a `columns` call asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnSet {
    #[default]
    All,
    Primary,
    /// Columns worth showing in a listing.
    Essential,
}

impl ColumnSet {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "all" => Some(ColumnSet::All),
            "primary" => Some(ColumnSet::Primary),
            "essential" => Some(ColumnSet::Essential),
            _ => None,
        }
    }
}

/// Metadata a class declares about itself. Anything left empty is derived
/// from the class name when the class is assimilated.
#[derive(Clone, Debug, Default)]
pub struct ClassInfo {
    pub moniker: Option<String>,
    pub title: Option<String>,
    pub plural: Option<String>,
    pub description: Option<String>,
}

#[async_trait]
pub trait DataClass: Send + Sync {
    /// Fully qualified name the class is configured under.
    fn class_name(&self) -> &str;

    fn info(&self) -> ClassInfo {
        ClassInfo::default()
    }

    fn primary_key(&self) -> &str;

    fn columns(&self, set: ColumnSet) -> Vec<String>;

    /// Parse an id that arrived as text.
    fn parse_id(&self, raw: &str) -> Option<Value>;

    fn find_column(&self, name: &str) -> Option<String> {
        self.columns(ColumnSet::All).into_iter().find(|c| c == name)
    }

    fn has_column(&self, name: &str) -> bool {
        self.find_column(name).is_some()
    }

    async fn create(&self, cx: ClassCx<'_>, fields: Row) -> Result<Row, StoreError>;

    async fn retrieve(&self, cx: ClassCx<'_>, id: &Value) -> Result<Option<Row>, StoreError>;

    async fn search(&self, cx: ClassCx<'_>, select: &Select) -> Result<Vec<Row>, StoreError>;

    async fn count(&self, cx: ClassCx<'_>, criteria: &[(String, Value)], matching: Match) -> Result<u64, StoreError>;

    async fn update(&self, cx: ClassCx<'_>, id: &Value, changes: Row) -> Result<Option<Row>, StoreError>;

    async fn delete(&self, cx: ClassCx<'_>, id: &Value) -> Result<Option<Row>, StoreError>;
}

/// Last `::` or `.` separated segment of a class name.
pub fn short_name(class_name: &str) -> &str {
    class_name
        .rsplit(|c| c == ':' || c == '.')
        .find(|s| !s.is_empty())
        .unwrap_or(class_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_takes_last_segment() {
        assert_eq!(short_name("music::Cd"), "Cd");
        assert_eq!(short_name("Music.Album"), "Album");
        assert_eq!(short_name("Plain"), "Plain");
    }

    #[test]
    fn column_sets_by_name() {
        assert_eq!(ColumnSet::from_name("Essential"), Some(ColumnSet::Essential));
        assert_eq!(ColumnSet::from_name("some"), None);
    }
}
