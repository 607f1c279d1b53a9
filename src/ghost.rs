//! Persisted entities, ghosts that stand in for objects not (or no longer)
//! in the database, and `Thing`, which is either.

use crate::error::FactoryError;
use crate::factory::Factory;
use crate::store::Row;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

/// Id every ghost carries.
pub const NEW_ID: &str = "new";

/// Read/write access shared by ghosts and persisted entities.
pub trait RowLike {
    fn moniker(&self) -> &str;

    fn id(&self) -> Value;

    /// A column value, or `id`/`type`. None for anything else.
    fn get(&self, name: &str) -> Option<Value>;

    /// Set a column. Returns false (and changes nothing) for non-columns.
    fn set(&mut self, name: &str, value: Value) -> bool;

    /// Flat object of every column plus `type` and `id`.
    fn to_value(&self) -> Value;
}

/// A row fetched from or written to a class's table.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    pub moniker: String,
    pub id: Value,
    pub row: Row,
}

impl Entity {
    pub fn from_row(moniker: &str, primary_key: &str, row: Row) -> Self {
        let id = row.get(primary_key).cloned().unwrap_or(Value::Null);
        Entity {
            moniker: moniker.to_string(),
            id,
            row,
        }
    }
}

fn flat(moniker: &str, id: &Value, row: &Row) -> Value {
    let mut out = row.clone();
    out.insert("type".to_string(), Value::String(moniker.to_string()));
    out.entry("id".to_string()).or_insert_with(|| id.clone());
    Value::Object(out)
}

impl RowLike for Entity {
    fn moniker(&self) -> &str {
        &self.moniker
    }

    fn id(&self) -> Value {
        self.id.clone()
    }

    fn get(&self, name: &str) -> Option<Value> {
        match name {
            "type" => Some(Value::String(self.moniker.clone())),
            "id" => Some(self.row.get("id").cloned().unwrap_or_else(|| self.id.clone())),
            _ => self.row.get(name).cloned(),
        }
    }

    fn set(&mut self, name: &str, value: Value) -> bool {
        match self.row.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn to_value(&self) -> Value {
        flat(&self.moniker, &self.id, &self.row)
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_flat(&self.to_value(), serializer)
    }
}

fn serialize_flat<S: Serializer>(value: &Value, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Value::Object(obj) => {
            let mut map = serializer.serialize_map(Some(obj.len()))?;
            for (k, v) in obj {
                map.serialize_entry(k, v)?;
            }
            map.end()
        }
        other => other.serialize(serializer),
    }
}

/// Stand-in for an object of a known class that is not in the database.
#[derive(Clone, Debug, PartialEq)]
pub struct Ghost {
    moniker: String,
    columns: Vec<String>,
    primary_key: String,
    fields: Row,
}

impl Ghost {
    /// A ghost of `moniker` seeded from the real columns in `fields`.
    /// None when no class answers to the moniker.
    pub fn new(factory: &Factory, moniker: &str, fields: Row) -> Option<Ghost> {
        let class = factory.class(moniker)?;
        let columns = class.columns(crate::class::ColumnSet::All);
        let fields = fields.into_iter().filter(|(k, _)| columns.contains(k)).collect();
        Some(Ghost {
            moniker: moniker.to_string(),
            columns,
            primary_key: class.primary_key().to_string(),
            fields,
        })
    }

    /// Snapshot of every column of a persisted entity.
    pub fn from_existing(factory: &Factory, entity: &Entity) -> Option<Ghost> {
        Ghost::new(factory, &entity.moniker, entity.row.clone())
    }

    pub fn fields(&self) -> &Row {
        &self.fields
    }

    fn is_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Persist a copy. `id`, `type` and the primary key are left to the
    /// store; the ghost itself is unchanged.
    pub async fn make(&self, factory: &Factory) -> Result<Entity, FactoryError> {
        let mut fields = self.fields.clone();
        fields.remove("id");
        fields.remove("type");
        fields.remove(&self.primary_key);
        match factory.create(&self.moniker, fields).await? {
            Some(entity) => Ok(entity),
            None => factory.raise(FactoryError::BadArguments {
                operation: "create",
                reason: format!("no class for moniker '{}'", self.moniker),
            }),
        }
    }
}

impl RowLike for Ghost {
    fn moniker(&self) -> &str {
        &self.moniker
    }

    fn id(&self) -> Value {
        Value::String(NEW_ID.to_string())
    }

    fn get(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(self.id()),
            "type" => Some(Value::String(self.moniker.clone())),
            _ if self.is_column(name) => Some(self.fields.get(name).cloned().unwrap_or(Value::Null)),
            _ => None,
        }
    }

    fn set(&mut self, name: &str, value: Value) -> bool {
        if name == "id" || name == "type" || !self.is_column(name) {
            return false;
        }
        self.fields.insert(name.to_string(), value);
        true
    }

    fn to_value(&self) -> Value {
        let mut row = Row::new();
        for col in &self.columns {
            row.insert(col.clone(), self.fields.get(col).cloned().unwrap_or(Value::Null));
        }
        row.insert("id".to_string(), self.id());
        flat(&self.moniker, &self.id(), &row)
    }
}

impl Serialize for Ghost {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_flat(&self.to_value(), serializer)
    }
}

/// The object a request is about.
#[derive(Clone, Debug, PartialEq)]
pub enum Thing {
    Ghost(Ghost),
    Persisted(Entity),
}

impl Thing {
    pub fn is_ghost(&self) -> bool {
        matches!(self, Thing::Ghost(_))
    }

    /// Write to the database: a ghost is created, an entity saves its fields.
    pub async fn materialize(self, factory: &Factory) -> Result<Entity, FactoryError> {
        match self {
            Thing::Ghost(ghost) => ghost.make(factory).await,
            Thing::Persisted(entity) => {
                let updated = factory
                    .update(&entity.moniker, &entity.id, entity.row.clone())
                    .await?;
                Ok(updated.unwrap_or(entity))
            }
        }
    }

    fn inner(&self) -> &dyn RowLike {
        match self {
            Thing::Ghost(g) => g,
            Thing::Persisted(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn RowLike {
        match self {
            Thing::Ghost(g) => g,
            Thing::Persisted(e) => e,
        }
    }
}

impl RowLike for Thing {
    fn moniker(&self) -> &str {
        self.inner().moniker()
    }

    fn id(&self) -> Value {
        self.inner().id()
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.inner().get(name)
    }

    fn set(&mut self, name: &str, value: Value) -> bool {
        self.inner_mut().set(name, value)
    }

    fn to_value(&self) -> Value {
        self.inner().to_value()
    }
}

impl Serialize for Thing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_flat(&self.to_value(), serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassCatalog, ClassDef};
    use crate::config::ConfigValue;
    use crate::factory::FactoryOptions;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn factory() -> Factory {
        let mut catalog = ClassCatalog::new();
        catalog.define(ClassDef::new("music::Cd", "cd", &["title", "year"]));
        let options = FactoryOptions::new(Arc::new(catalog))
            .store(Arc::new(MemoryStore::new("memory://ghosts")))
            .set("class", ConfigValue::List(vec!["music::Cd".into()]));
        Factory::new("ghosts", options).unwrap()
    }

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn unknown_monikers_have_no_ghost() {
        assert!(Ghost::new(&factory(), "lp", Row::new()).is_none());
    }

    #[test]
    fn ghost_fields_are_forgiving() {
        let f = factory();
        let mut ghost = Ghost::new(&f, "cd", row(json!({"title": "X", "colour": "red"}))).unwrap();
        assert_eq!(ghost.id(), json!("new"));
        assert_eq!(ghost.get("title"), Some(json!("X")));
        assert_eq!(ghost.get("year"), Some(Value::Null));
        assert_eq!(ghost.get("colour"), None);
        assert!(!ghost.set("colour", json!("blue")));
        assert!(!ghost.set("id", json!(4)));
        assert!(ghost.set("year", json!(1969)));
        assert_eq!(ghost.to_value()["type"], json!("cd"));
    }

    #[tokio::test]
    async fn make_persists_and_leaves_the_ghost_reusable() {
        let f = factory();
        let ghost = Ghost::new(&f, "cd", row(json!({"title": "X"}))).unwrap();
        let first = ghost.make(&f).await.unwrap();
        let second = ghost.make(&f).await.unwrap();
        assert_eq!(first.get("title"), Some(json!("X")));
        assert_ne!(first.id(), json!("new"));
        assert_ne!(first.id, second.id);
        assert_eq!(ghost.id(), json!("new"));
        assert_eq!(f.count_all("cd").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn from_existing_snapshots_every_column() {
        let f = factory();
        let entity = f.create("cd", row(json!({"title": "Kind of Blue", "year": 1959}))).await.unwrap().unwrap();
        let ghost = Ghost::from_existing(&f, &entity).unwrap();
        f.delete("cd", &entity.id).await.unwrap();
        assert_eq!(ghost.get("title"), Some(json!("Kind of Blue")));
        assert_eq!(ghost.get("year"), Some(json!(1959)));
        assert_eq!(ghost.id(), json!("new"));
    }

    #[tokio::test]
    async fn things_materialize_either_way() {
        let f = factory();
        let mut thing = Thing::Ghost(Ghost::new(&f, "cd", row(json!({"title": "A"}))).unwrap());
        assert!(thing.is_ghost());
        thing.set("year", json!(2001));
        let entity = thing.materialize(&f).await.unwrap();
        assert_eq!(entity.get("year"), Some(json!(2001)));

        let mut thing = Thing::Persisted(entity.clone());
        assert!(thing.set("title", json!("B")));
        assert!(!thing.set("colour", json!("red")));
        let saved = thing.materialize(&f).await.unwrap();
        assert_eq!(saved.id, entity.id);
        let fetched = f.retrieve("cd", &entity.id).await.unwrap().unwrap();
        assert_eq!(fetched.get("title"), Some(json!("B")));
    }
}
