//! Generic class over one table, built from a `ClassDef`.

use super::{ClassCx, ClassDef, ClassInfo, ColumnSet, DataClass};
use crate::error::StoreError;
use crate::store::{Match, Row, Select};
use async_trait::async_trait;
use serde_json::Value;

pub struct TableClass {
    def: ClassDef,
}

impl TableClass {
    pub fn new(def: ClassDef) -> Self {
        TableClass { def }
    }

    /// Keep only real columns.
    fn columns_only(&self, fields: Row) -> Row {
        fields
            .into_iter()
            .filter(|(k, _)| self.def.table.has_column(k))
            .collect()
    }
}

#[async_trait]
impl DataClass for TableClass {
    fn class_name(&self) -> &str {
        &self.def.name
    }

    fn info(&self) -> ClassInfo {
        ClassInfo {
            moniker: self.def.moniker.clone(),
            title: self.def.title.clone(),
            plural: self.def.plural.clone(),
            description: self.def.description.clone(),
        }
    }

    fn primary_key(&self) -> &str {
        &self.def.table.primary_key
    }

    fn columns(&self, set: ColumnSet) -> Vec<String> {
        match set {
            ColumnSet::All => self.def.table.columns.clone(),
            ColumnSet::Primary => vec![self.def.table.primary_key.clone()],
            ColumnSet::Essential if self.def.essential.is_empty() => self.def.table.columns.clone(),
            ColumnSet::Essential => self.def.essential.clone(),
        }
    }

    fn parse_id(&self, raw: &str) -> Option<Value> {
        self.def.table.pk_type.parse_id(raw)
    }

    async fn create(&self, cx: ClassCx<'_>, fields: Row) -> Result<Row, StoreError> {
        let row = self.columns_only(fields);
        cx.db.insert(&self.def.table, &row).await
    }

    async fn retrieve(&self, cx: ClassCx<'_>, id: &Value) -> Result<Option<Row>, StoreError> {
        cx.db.fetch(&self.def.table, id).await
    }

    async fn search(&self, cx: ClassCx<'_>, select: &Select) -> Result<Vec<Row>, StoreError> {
        self.def.table.check_criteria(&select.criteria)?;
        let mut select = select.clone();
        if let Some((col, _)) = &select.sort {
            if !self.def.table.has_column(col) {
                select.sort = None;
            }
        }
        cx.db.select(&self.def.table, &select).await
    }

    async fn count(&self, cx: ClassCx<'_>, criteria: &[(String, Value)], matching: Match) -> Result<u64, StoreError> {
        self.def.table.check_criteria(criteria)?;
        cx.db.count(&self.def.table, criteria, matching).await
    }

    async fn update(&self, cx: ClassCx<'_>, id: &Value, changes: Row) -> Result<Option<Row>, StoreError> {
        let mut changes = self.columns_only(changes);
        changes.remove(&self.def.table.primary_key);
        cx.db.update(&self.def.table, id, &changes).await
    }

    async fn delete(&self, cx: ClassCx<'_>, id: &Value) -> Result<Option<Row>, StoreError> {
        cx.db.delete(&self.def.table, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cd() -> TableClass {
        TableClass::new(ClassDef::new("music::Cd", "cd", &["title", "year", "notes"]).essential(&["title", "year"]))
    }

    #[test]
    fn column_sets() {
        let class = cd();
        assert_eq!(class.columns(ColumnSet::All), vec!["id", "title", "year", "notes"]);
        assert_eq!(class.columns(ColumnSet::Primary), vec!["id"]);
        assert_eq!(class.columns(ColumnSet::Essential), vec!["title", "year"]);
        assert_eq!(class.find_column("notes").as_deref(), Some("notes"));
        assert!(class.find_column("colour").is_none());
    }

    #[test]
    fn criteria_on_unknown_columns_are_refused() {
        let class = cd();
        assert!(class.def.table.check_criteria(&[("title".into(), Value::from("A"))]).is_ok());
        let err = class
            .def
            .table
            .check_criteria(&[("title".into(), Value::from("A")), ("titel".into(), Value::from("A"))])
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { ref column, .. } if column == "titel"));
    }

    #[test]
    fn ids_parse_by_key_type() {
        assert_eq!(cd().parse_id("12"), Some(Value::from(12)));
        assert_eq!(cd().parse_id("new"), None);
    }
}
