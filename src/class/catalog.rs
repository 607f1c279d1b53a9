//! Class implementations available to every site, keyed by class name.

use super::{DataClass, TableClass};
use crate::error::ClassError;
use crate::store::{PkType, TableDef};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub type Loader = Arc<dyn Fn() -> Result<Arc<dyn DataClass>, ClassError> + Send + Sync>;

/// Declarative table-backed class.
#[derive(Clone, Debug)]
pub struct ClassDef {
    pub name: String,
    pub moniker: Option<String>,
    pub title: Option<String>,
    pub plural: Option<String>,
    pub description: Option<String>,
    pub table: TableDef,
    /// Columns shown in listings; empty means every column.
    pub essential: Vec<String>,
}

impl ClassDef {
    /// A class over `table` keyed by an integer `id` column.
    pub fn new(name: &str, table: &str, columns: &[&str]) -> Self {
        let mut all = vec!["id".to_string()];
        all.extend(columns.iter().filter(|c| **c != "id").map(|c| c.to_string()));
        ClassDef {
            name: name.to_string(),
            moniker: None,
            title: None,
            plural: None,
            description: None,
            table: TableDef {
                table: table.to_string(),
                primary_key: "id".to_string(),
                pk_type: PkType::Int,
                columns: all,
                sql_types: BTreeMap::new(),
            },
            essential: Vec::new(),
        }
    }

    pub fn moniker(mut self, moniker: &str) -> Self {
        self.moniker = Some(moniker.to_string());
        self
    }

    pub fn title(mut self, title: &str, plural: &str) -> Self {
        self.title = Some(title.to_string());
        self.plural = Some(plural.to_string());
        self
    }

    pub fn description(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }

    pub fn primary_key(mut self, column: &str, pk_type: PkType) -> Self {
        self.table.columns.retain(|c| c != "id" && c != column);
        self.table.columns.insert(0, column.to_string());
        self.table.primary_key = column.to_string();
        self.table.pk_type = pk_type;
        self
    }

    pub fn sql_type(mut self, column: &str, sql_type: &str) -> Self {
        self.table.sql_types.insert(column.to_string(), sql_type.to_string());
        self
    }

    pub fn essential(mut self, columns: &[&str]) -> Self {
        self.essential = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

enum Entry {
    Table(ClassDef),
    Custom(Loader),
}

#[derive(Default)]
pub struct ClassCatalog {
    entries: HashMap<String, Entry>,
}

impl ClassCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table-backed class. A later definition under the same name wins.
    pub fn define(&mut self, def: ClassDef) -> &mut Self {
        self.entries.insert(def.name.clone(), Entry::Table(def));
        self
    }

    /// Add a class built by custom code.
    pub fn register<F>(&mut self, name: &str, loader: F) -> &mut Self
    where
        F: Fn() -> Result<Arc<dyn DataClass>, ClassError> + Send + Sync + 'static,
    {
        self.entries.insert(name.to_string(), Entry::Custom(Arc::new(loader)));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate the class configured under `name`.
    pub fn load(&self, name: &str) -> Result<Arc<dyn DataClass>, ClassError> {
        let entry = self.entries.get(name).ok_or_else(|| ClassError::Load {
            class: name.to_string(),
            reason: "no such class in the catalog".to_string(),
        })?;
        let class = match entry {
            Entry::Table(def) => Arc::new(TableClass::new(def.clone())) as Arc<dyn DataClass>,
            Entry::Custom(loader) => loader()?,
        };
        if class.class_name() != name {
            return Err(ClassError::Load {
                class: name.to_string(),
                reason: format!("loader produced class '{}'", class.class_name()),
            });
        }
        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_fail_to_load() {
        let catalog = ClassCatalog::new();
        let err = catalog.load("music::Cd").err().unwrap();
        assert!(matches!(err, ClassError::Load { ref class, .. } if class == "music::Cd"));
    }

    #[test]
    fn table_definitions_load_as_table_classes() {
        let mut catalog = ClassCatalog::new();
        catalog.define(ClassDef::new("music::Cd", "cd", &["title", "year"]));
        let class = catalog.load("music::Cd").unwrap();
        assert_eq!(class.primary_key(), "id");
        assert!(class.has_column("year"));
    }

    #[test]
    fn failing_loaders_surface_their_error() {
        let mut catalog = ClassCatalog::new();
        catalog.register("broken::Thing", || {
            Err(ClassError::Load {
                class: "broken::Thing".into(),
                reason: "missing schema".into(),
            })
        });
        assert!(catalog.load("broken::Thing").is_err());
    }

    #[test]
    fn custom_primary_key_moves_to_front() {
        let def = ClassDef::new("a::B", "b", &["name", "code"]).primary_key("code", PkType::Text);
        assert_eq!(def.table.columns, vec!["code", "name"]);
        assert_eq!(def.table.primary_key, "code");
    }
}
