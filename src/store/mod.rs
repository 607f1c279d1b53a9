//! Data store collaborator: the persistence contract data classes run against.

mod dsn;
mod memory;
mod postgres;

pub use dsn::{ConnectParams, Driver};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One row: column name -> value.
pub type Row = serde_json::Map<String, Value>;

/// Primary key type for parsing ids that arrive as text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkType {
    Uuid,
    BigInt,
    Int,
    Text,
}

impl PkType {
    /// Parse an id from a request parameter. Returns None when the text can't
    /// be a key of this type.
    pub fn parse_id(self, s: &str) -> Option<Value> {
        match self {
            PkType::Uuid => uuid::Uuid::parse_str(s).ok().map(|u| Value::String(u.to_string())),
            PkType::BigInt | PkType::Int => s.trim().parse::<i64>().ok().map(|n| Value::Number(n.into())),
            PkType::Text => Some(Value::String(s.to_string())),
        }
    }
}

/// Table a data class persists to.
#[derive(Clone, Debug)]
pub struct TableDef {
    /// Optionally schema-qualified (`music.cds`).
    pub table: String,
    pub primary_key: String,
    pub pk_type: PkType,
    /// All columns, primary key included.
    pub columns: Vec<String>,
    /// SQL type per column (e.g. `int4`, `timestamptz`) used to cast bound
    /// parameters. Columns without an entry bind as given.
    pub sql_types: BTreeMap<String, String>,
}

impl TableDef {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn sql_type(&self, column: &str) -> Option<&str> {
        self.sql_types.get(column).map(String::as_str)
    }

    /// Every criterion must name a real column.
    pub fn check_criteria(&self, criteria: &[(String, Value)]) -> Result<(), StoreError> {
        match criteria.iter().find(|(col, _)| !self.has_column(col)) {
            Some((col, _)) => Err(StoreError::UnknownColumn {
                table: self.table.clone(),
                column: col.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Match {
    #[default]
    Exact,
    /// SQL LIKE with `%` and `_` wildcards.
    Like,
}

#[derive(Clone, Debug, Default)]
pub struct Select {
    pub criteria: Vec<(String, Value)>,
    pub matching: Match,
    /// Column and descending flag.
    pub sort: Option<(String, bool)>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[async_trait]
pub trait Store: Send + Sync {
    fn connection_string(&self) -> &str;

    /// Insert one row; a missing primary key is assigned by the store.
    async fn insert(&self, table: &TableDef, row: &Row) -> Result<Row, StoreError>;

    async fn fetch(&self, table: &TableDef, id: &Value) -> Result<Option<Row>, StoreError>;

    async fn update(&self, table: &TableDef, id: &Value, changes: &Row) -> Result<Option<Row>, StoreError>;

    async fn delete(&self, table: &TableDef, id: &Value) -> Result<Option<Row>, StoreError>;

    async fn select(&self, table: &TableDef, select: &Select) -> Result<Vec<Row>, StoreError>;

    async fn count(&self, table: &TableDef, criteria: &[(String, Value)], matching: Match) -> Result<u64, StoreError>;
}

/// Open the store the parameters describe.
pub async fn connect(params: &ConnectParams) -> Result<Arc<dyn Store>, StoreError> {
    let dsn = params.connection_string();
    tracing::info!(driver = ?params.driver, "opening data store");
    match params.driver {
        Driver::Memory => Ok(Arc::new(MemoryStore::new(dsn))),
        Driver::Postgres => Ok(Arc::new(PgStore::connect(&dsn).await?)),
    }
}

/// Text form of a key value, used to compare ids that arrive as strings
/// against stored numbers.
pub fn key_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Ordering used when sorting rows: nulls first, numbers numerically, then text.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => key_text(a).cmp(&key_text(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_id_by_pk_type() {
        assert_eq!(PkType::Int.parse_id("42"), Some(json!(42)));
        assert_eq!(PkType::Int.parse_id("new"), None);
        assert_eq!(PkType::Text.parse_id("abc"), Some(json!("abc")));
        assert!(PkType::Uuid.parse_id("nope").is_none());
    }

    #[test]
    fn values_compare_numerically_and_nulls_first() {
        assert_eq!(compare_values(&json!(9), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&Value::Null, &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
    }
}
