//! In-process store for tooling and tests. Tables appear on first use.

use super::{compare_values, key_text, Match, PkType, Row, Select, Store, TableDef};
use crate::error::StoreError;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Default)]
struct MemTable {
    rows: Vec<Row>,
    next_id: i64,
}

pub struct MemoryStore {
    dsn: String,
    tables: Mutex<HashMap<String, MemTable>>,
}

impl MemoryStore {
    pub fn new(dsn: impl Into<String>) -> Self {
        MemoryStore {
            dsn: dsn.into(),
            tables: Mutex::new(HashMap::new()),
        }
    }

    fn with_table<T>(&self, table: &TableDef, f: impl FnOnce(&mut MemTable) -> T) -> T {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let t = tables.entry(table.table.clone()).or_default();
        f(t)
    }
}

fn check_columns(table: &TableDef, row: &Row) -> Result<(), StoreError> {
    match row.keys().find(|k| !table.has_column(k)) {
        Some(col) => Err(StoreError::UnknownColumn {
            table: table.table.clone(),
            column: col.clone(),
        }),
        None => Ok(()),
    }
}

/// Translate a LIKE pattern into an anchored regex.
fn like_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

fn matches(row: &Row, criteria: &[(String, Value)], matching: Match) -> bool {
    criteria.iter().all(|(col, want)| {
        let have = row.get(col).unwrap_or(&Value::Null);
        match matching {
            Match::Exact => key_text(have) == key_text(want),
            Match::Like => {
                if have.is_null() {
                    return false;
                }
                like_regex(&key_text(want))
                    .map(|re| re.is_match(&key_text(have)))
                    .unwrap_or(false)
            }
        }
    })
}

fn position(t: &MemTable, table: &TableDef, id: &Value) -> Option<usize> {
    let wanted = key_text(id);
    t.rows.iter().position(|r| {
        r.get(&table.primary_key)
            .map(|v| key_text(v) == wanted)
            .unwrap_or(false)
    })
}

#[async_trait]
impl Store for MemoryStore {
    fn connection_string(&self) -> &str {
        &self.dsn
    }

    async fn insert(&self, table: &TableDef, row: &Row) -> Result<Row, StoreError> {
        check_columns(table, row)?;
        Ok(self.with_table(table, |t| {
            let mut stored = Row::new();
            for col in &table.columns {
                stored.insert(col.clone(), row.get(col).cloned().unwrap_or(Value::Null));
            }
            let pk_missing = stored.get(&table.primary_key).map(Value::is_null).unwrap_or(true);
            if pk_missing {
                t.next_id += 1;
                let id = match table.pk_type {
                    PkType::Int | PkType::BigInt => Value::Number(t.next_id.into()),
                    PkType::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
                    PkType::Text => Value::String(t.next_id.to_string()),
                };
                stored.insert(table.primary_key.clone(), id);
            } else if let Some(n) = stored.get(&table.primary_key).and_then(Value::as_i64) {
                t.next_id = t.next_id.max(n);
            }
            t.rows.push(stored.clone());
            stored
        }))
    }

    async fn fetch(&self, table: &TableDef, id: &Value) -> Result<Option<Row>, StoreError> {
        Ok(self.with_table(table, |t| position(t, table, id).map(|i| t.rows[i].clone())))
    }

    async fn update(&self, table: &TableDef, id: &Value, changes: &Row) -> Result<Option<Row>, StoreError> {
        check_columns(table, changes)?;
        Ok(self.with_table(table, |t| {
            let i = position(t, table, id)?;
            let row = &mut t.rows[i];
            for (k, v) in changes {
                if *k != table.primary_key {
                    row.insert(k.clone(), v.clone());
                }
            }
            Some(row.clone())
        }))
    }

    async fn delete(&self, table: &TableDef, id: &Value) -> Result<Option<Row>, StoreError> {
        Ok(self.with_table(table, |t| position(t, table, id).map(|i| t.rows.remove(i))))
    }

    async fn select(&self, table: &TableDef, select: &Select) -> Result<Vec<Row>, StoreError> {
        table.check_criteria(&select.criteria)?;
        if let Some((col, _)) = &select.sort {
            if !table.has_column(col) {
                return Err(StoreError::UnknownColumn {
                    table: table.table.clone(),
                    column: col.clone(),
                });
            }
        }
        Ok(self.with_table(table, |t| {
            let mut rows: Vec<Row> = t
                .rows
                .iter()
                .filter(|r| matches(r, &select.criteria, select.matching))
                .cloned()
                .collect();
            let (sort_col, desc) = select
                .sort
                .clone()
                .unwrap_or_else(|| (table.primary_key.clone(), false));
            rows.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(&sort_col).unwrap_or(&Value::Null),
                    b.get(&sort_col).unwrap_or(&Value::Null),
                );
                if desc {
                    ord.reverse()
                } else {
                    ord
                }
            });
            let offset = select.offset.unwrap_or(0) as usize;
            let limit = select.limit.map(|l| l as usize).unwrap_or(usize::MAX);
            rows.into_iter().skip(offset).take(limit).collect()
        }))
    }

    async fn count(&self, table: &TableDef, criteria: &[(String, Value)], matching: Match) -> Result<u64, StoreError> {
        table.check_criteria(criteria)?;
        Ok(self.with_table(table, |t| {
            t.rows.iter().filter(|r| matches(r, criteria, matching)).count() as u64
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cds() -> TableDef {
        TableDef {
            table: "cd".into(),
            primary_key: "id".into(),
            pk_type: PkType::Int,
            columns: vec!["id".into(), "title".into(), "year".into()],
            sql_types: Default::default(),
        }
    }

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_fills_columns() {
        let store = MemoryStore::new("memory://t");
        let a = store.insert(&cds(), &row(json!({"title": "A"}))).await.unwrap();
        let b = store.insert(&cds(), &row(json!({"title": "B"}))).await.unwrap();
        assert_eq!(a["id"], json!(1));
        assert_eq!(b["id"], json!(2));
        assert_eq!(a["year"], Value::Null);
    }

    #[tokio::test]
    async fn fetch_matches_string_ids_against_numbers() {
        let store = MemoryStore::new("memory://t");
        store.insert(&cds(), &row(json!({"title": "A"}))).await.unwrap();
        let found = store.fetch(&cds(), &json!("1")).await.unwrap();
        assert_eq!(found.unwrap()["title"], json!("A"));
        assert!(store.fetch(&cds(), &json!(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_columns_are_rejected() {
        let store = MemoryStore::new("memory://t");
        let err = store.insert(&cds(), &row(json!({"colour": "red"}))).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn select_filters_sorts_and_pages() {
        let store = MemoryStore::new("memory://t");
        for (title, year) in [("Blue", 1971), ("Abbey Road", 1969), ("Blonde", 1966)] {
            store.insert(&cds(), &row(json!({"title": title, "year": year}))).await.unwrap();
        }
        let like = Select {
            criteria: vec![("title".into(), json!("Bl%"))],
            matching: Match::Like,
            sort: Some(("year".into(), true)),
            ..Select::default()
        };
        let rows = store.select(&cds(), &like).await.unwrap();
        let titles: Vec<&Value> = rows.iter().map(|r| &r["title"]).collect();
        assert_eq!(titles, vec![&json!("Blue"), &json!("Blonde")]);

        let page = Select {
            sort: Some(("year".into(), false)),
            limit: Some(1),
            offset: Some(1),
            ..Select::default()
        };
        let rows = store.select(&cds(), &page).await.unwrap();
        assert_eq!(rows[0]["title"], json!("Abbey Road"));
        assert_eq!(store.count(&cds(), &[], Match::Exact).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn update_and_delete_by_id() {
        let store = MemoryStore::new("memory://t");
        store.insert(&cds(), &row(json!({"title": "A"}))).await.unwrap();
        let updated = store
            .update(&cds(), &json!(1), &row(json!({"title": "A2", "id": 7})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["title"], json!("A2"));
        assert_eq!(updated["id"], json!(1));
        let gone = store.delete(&cds(), &json!(1)).await.unwrap();
        assert!(gone.is_some());
        assert_eq!(store.count(&cds(), &[], Match::Exact).await.unwrap(), 0);
    }

    #[test]
    fn like_wildcards() {
        let re = like_regex("a_c%").unwrap();
        assert!(re.is_match("abcdef"));
        assert!(!re.is_match("ac"));
        assert!(like_regex("50.5%").unwrap().is_match("50.5 percent"));
    }
}
