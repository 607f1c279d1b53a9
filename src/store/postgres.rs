//! Store execution against PostgreSQL.

use super::{Match, Row, Select, Store, TableDef};
use crate::error::StoreError;
use crate::sql::{self, PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::PgPool;
use std::str::FromStr;

const MAX_CONNECTIONS: u32 = 5;

pub struct PgStore {
    dsn: String,
    pool: PgPool,
}

impl PgStore {
    /// Open a pool. The pool connects lazily, so a site whose database is
    /// down still starts and fails per query.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let opts = PgConnectOptions::from_str(dsn).map_err(|e| StoreError::Dsn(e.to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_lazy_with(opts);
        Ok(PgStore {
            dsn: dsn.to_string(),
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_optional(&self, table: &TableDef, q: &QueryBuf) -> Result<Option<Row>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(table, e))?;
        Ok(row.map(|r| row_to_json(&r)))
    }

    async fn fetch_all(&self, table: &TableDef, q: &QueryBuf) -> Result<Vec<Row>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let rows = query.fetch_all(&self.pool).await.map_err(|e| classify(table, e))?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

/// Undefined-table errors name the table; everything else stays a database error.
fn classify(table: &TableDef, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("42P01") {
            return StoreError::UnknownTable(table.table.clone());
        }
    }
    StoreError::Db(e)
}

#[async_trait]
impl Store for PgStore {
    fn connection_string(&self) -> &str {
        &self.dsn
    }

    async fn insert(&self, table: &TableDef, row: &Row) -> Result<Row, StoreError> {
        let q = sql::insert(table, row);
        self.fetch_optional(table, &q)
            .await?
            .ok_or(StoreError::Db(sqlx::Error::RowNotFound))
    }

    async fn fetch(&self, table: &TableDef, id: &Value) -> Result<Option<Row>, StoreError> {
        let mut q = sql::select_by_id(table);
        q.params.push(id.clone());
        self.fetch_optional(table, &q).await
    }

    async fn update(&self, table: &TableDef, id: &Value, changes: &Row) -> Result<Option<Row>, StoreError> {
        let q = sql::update(table, id, changes);
        self.fetch_optional(table, &q).await
    }

    async fn delete(&self, table: &TableDef, id: &Value) -> Result<Option<Row>, StoreError> {
        let mut q = sql::delete(table);
        q.params.push(id.clone());
        self.fetch_optional(table, &q).await
    }

    async fn select(&self, table: &TableDef, select: &Select) -> Result<Vec<Row>, StoreError> {
        table.check_criteria(&select.criteria)?;
        let q = sql::select_list(table, select);
        self.fetch_all(table, &q).await
    }

    async fn count(&self, table: &TableDef, criteria: &[(String, Value)], matching: Match) -> Result<u64, StoreError> {
        table.check_criteria(criteria)?;
        let q = sql::count(table, criteria, matching);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let n = query.fetch_one(&self.pool).await.map_err(|e| classify(table, e))?;
        Ok(n.max(0) as u64)
    }
}

fn row_to_json(row: &PgRow) -> Row {
    use sqlx::{Column, Row as _};
    let mut map = Row::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

/// Decode one cell by trying the column types a data class is likely to use.
fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bad_connection_strings_are_dsn_errors() {
        let err = PgStore::connect("not a url").await.err().unwrap();
        assert!(matches!(err, StoreError::Dsn(_)));
    }

    #[tokio::test]
    async fn connecting_is_lazy() {
        let store = PgStore::connect("postgres://nobody@127.0.0.1:1/none").await.unwrap();
        assert_eq!(store.connection_string(), "postgres://nobody@127.0.0.1:1/none");
    }
}
