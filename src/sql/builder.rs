//! Builds parameterized INSERT, SELECT, UPDATE, DELETE and COUNT from a table definition.

use crate::store::{Match, Row, Select, TableDef};
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from class definitions).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name.
fn qualified_table(table: &str) -> String {
    table.split('.').map(quoted).collect::<Vec<_>>().join(".")
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }
}

/// `$n`, cast to the column's declared SQL type when known.
fn placeholder(table: &TableDef, column: &str, n: u32) -> String {
    table
        .sql_type(column)
        .map(|t| format!("${}::{}", n, t))
        .unwrap_or_else(|| format!("${}", n))
}

fn select_column_list(table: &TableDef) -> String {
    table
        .columns
        .iter()
        .map(|c| quoted(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn where_clause(q: &mut QueryBuf, table: &TableDef, criteria: &[(String, Value)], matching: Match) -> String {
    let mut parts = Vec::new();
    for (col, val) in criteria {
        if !table.has_column(col) {
            continue;
        }
        let n = q.push_param(val.clone());
        match matching {
            Match::Exact => parts.push(format!("{}::text = ${}::text", quoted(col), n)),
            Match::Like => parts.push(format!("{}::text LIKE ${}::text", quoted(col), n)),
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// SELECT by primary key. Caller adds id as sole param.
pub fn select_by_id(table: &TableDef) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.sql = format!(
        "SELECT {} FROM {} WHERE {}::text = $1::text",
        select_column_list(table),
        qualified_table(&table.table),
        quoted(&table.primary_key)
    );
    q
}

/// SELECT with criteria, ORDER BY the sort column (default pk) and optional LIMIT/OFFSET.
/// Stores check criteria columns before building; unknown names never reach
/// the SQL text.
pub fn select_list(table: &TableDef, select: &Select) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, table, &select.criteria, select.matching);
    let (sort_col, desc) = match &select.sort {
        Some((col, desc)) if table.has_column(col) => (col.as_str(), *desc),
        _ => (table.primary_key.as_str(), false),
    };
    let order_clause = format!(" ORDER BY {}{}", quoted(sort_col), if desc { " DESC" } else { "" });
    let limit_clause = select.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = select.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        select_column_list(table),
        qualified_table(&table.table),
        where_sql,
        order_clause,
        limit_clause,
        offset_clause
    );
    q
}

pub fn count(table: &TableDef, criteria: &[(String, Value)], matching: Match) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, table, criteria, matching);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", qualified_table(&table.table), where_sql);
    q
}

/// INSERT the known columns present in the row; absent columns take the DB default.
pub fn insert(table: &TableDef, row: &Row) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &table.columns {
        let Some(val) = row.get(c) else { continue };
        if *c == table.primary_key && val.is_null() {
            continue;
        }
        let n = q.push_param(val.clone());
        cols.push(quoted(c));
        placeholders.push(placeholder(table, c, n));
    }
    let returning = select_column_list(table);
    q.sql = if cols.is_empty() {
        format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            qualified_table(&table.table),
            returning
        )
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            qualified_table(&table.table),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by id: SET only known, non-key columns present in the changes.
pub fn update(table: &TableDef, id: &Value, changes: &Row) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for (k, v) in changes {
        if *k == table.primary_key || !table.has_column(k) {
            continue;
        }
        let n = q.push_param(v.clone());
        sets.push(format!("{} = {}", quoted(k), placeholder(table, k, n)));
    }
    let returning = select_column_list(table);
    if sets.is_empty() {
        q.params.push(id.clone());
        q.sql = format!(
            "SELECT {} FROM {} WHERE {}::text = $1::text",
            returning,
            qualified_table(&table.table),
            quoted(&table.primary_key)
        );
        return q;
    }
    let id_param = q.push_param(id.clone());
    q.sql = format!(
        "UPDATE {} SET {} WHERE {}::text = ${}::text RETURNING {}",
        qualified_table(&table.table),
        sets.join(", "),
        quoted(&table.primary_key),
        id_param,
        returning
    );
    q
}

/// DELETE by id. Caller adds id as sole param.
pub fn delete(table: &TableDef) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.sql = format!(
        "DELETE FROM {} WHERE {}::text = $1::text RETURNING {}",
        qualified_table(&table.table),
        quoted(&table.primary_key),
        select_column_list(table)
    );
    q
}
