//! Paged listings of one class.

use crate::ghost::Entity;
use crate::store::{Match, Row};
use serde::Serialize;
use serde_json::Value;

/// What to list: filter, sort and page window.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListQuery {
    /// 1-based; 0 is read as 1.
    pub page: u32,
    /// None uses the site's `page_size`.
    pub per_page: Option<u32>,
    pub sort: Option<String>,
    pub descending: bool,
    pub criteria: Vec<(String, Value)>,
    pub matching: Match,
}

impl ListQuery {
    /// Read a query from an object: `page`, `per_page`, `sort`, `order`
    /// (`asc`/`desc`) and `like` are controls; every other key is a criterion.
    pub fn from_object(obj: &Row) -> Self {
        let mut q = ListQuery::default();
        for (k, v) in obj {
            match k.as_str() {
                "page" => q.page = as_u32(v).unwrap_or(1),
                "per_page" => q.per_page = as_u32(v),
                "sort" => q.sort = v.as_str().filter(|s| !s.is_empty()).map(String::from),
                "order" => q.descending = v.as_str().map(|s| s.eq_ignore_ascii_case("desc")).unwrap_or(false),
                "like" => {
                    if truthy(v) {
                        q.matching = Match::Like;
                    }
                }
                _ => q.criteria.push((k.clone(), v.clone())),
            }
        }
        q
    }
}

fn as_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.as_str(), "1" | "true" | "yes" | "on"),
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Pager {
    pub moniker: String,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub pages: u32,
    pub items: Vec<Entity>,
    pub sort: Option<String>,
    pub descending: bool,
    pub prev: Option<u32>,
    pub next: Option<u32>,
}

impl Pager {
    pub fn new(moniker: &str, page: u32, per_page: u32, total: u64, items: Vec<Entity>) -> Self {
        let per_page = per_page.max(1);
        let pages = total.div_ceil(per_page as u64).max(1) as u32;
        let page = page.max(1);
        Pager {
            moniker: moniker.to_string(),
            page,
            per_page,
            total,
            pages,
            items,
            sort: None,
            descending: false,
            prev: (page > 1).then(|| page - 1),
            next: (page < pages).then(|| page + 1),
        }
    }

    pub fn sorted(mut self, sort: Option<String>, descending: bool) -> Self {
        self.sort = sort;
        self.descending = descending;
        self
    }

    /// Row offset of the first item on `page`.
    pub fn offset(page: u32, per_page: u32) -> u32 {
        page.max(1).saturating_sub(1).saturating_mul(per_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_arithmetic() {
        let p = Pager::new("cd", 2, 10, 25, Vec::new());
        assert_eq!(p.pages, 3);
        assert_eq!(p.prev, Some(1));
        assert_eq!(p.next, Some(3));
        let empty = Pager::new("cd", 1, 10, 0, Vec::new());
        assert_eq!(empty.pages, 1);
        assert_eq!(empty.next, None);
        assert_eq!(Pager::offset(3, 10), 20);
        assert_eq!(Pager::offset(0, 10), 0);
    }

    #[test]
    fn list_query_splits_controls_from_criteria() {
        let obj = json!({"page": "2", "per_page": 5, "sort": "year", "order": "DESC", "artist": "Miles"});
        let q = ListQuery::from_object(obj.as_object().unwrap());
        assert_eq!(q.page, 2);
        assert_eq!(q.per_page, Some(5));
        assert_eq!(q.sort.as_deref(), Some("year"));
        assert!(q.descending);
        assert_eq!(q.criteria, vec![("artist".to_string(), json!("Miles"))]);
        assert_eq!(q.matching, Match::Exact);
    }
}
