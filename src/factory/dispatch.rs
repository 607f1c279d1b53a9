//! The allow-list of generic operations and their typed arguments.

use super::pager::{ListQuery, Pager};
use crate::class::ColumnSet;
use crate::error::FactoryError;
use crate::ghost::Entity;
use crate::store::Row;
use serde::Serialize;
use serde_json::Value;

/// Operations a caller may invoke by name. Nothing outside this set is
/// reachable through `Factory::invoke`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Retrieve,
    Search,
    SearchLike,
    CountAll,
    All,
    Columns,
    FindColumn,
    Update,
    Delete,
    List,
}

impl Operation {
    pub const ALL: [Operation; 11] = [
        Operation::Create,
        Operation::Retrieve,
        Operation::Search,
        Operation::SearchLike,
        Operation::CountAll,
        Operation::All,
        Operation::Columns,
        Operation::FindColumn,
        Operation::Update,
        Operation::Delete,
        Operation::List,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Retrieve => "retrieve",
            Operation::Search => "search",
            Operation::SearchLike => "search_like",
            Operation::CountAll => "count_all",
            Operation::All => "all",
            Operation::Columns => "columns",
            Operation::FindColumn => "find_column",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::List => "list",
        }
    }

    /// Look up a built-in operation name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "retrieve_all" => Some(Operation::All),
            _ => Operation::ALL.into_iter().find(|op| op.name() == name),
        }
    }
}

/// A decoded invocation, ready to dispatch.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Create(Row),
    Retrieve(Value),
    Search(Vec<(String, Value)>),
    SearchLike(Vec<(String, Value)>),
    CountAll,
    All,
    Columns(ColumnSet),
    FindColumn(String),
    Update(Value, Row),
    Delete(Value),
    List(ListQuery),
}

impl Call {
    /// Decode positional arguments for `op`.
    pub fn decode(op: Operation, args: &[Value]) -> Result<Call, FactoryError> {
        let name = op.name();
        Ok(match op {
            Operation::Create => Call::Create(object_arg(name, args, 0)?),
            Operation::Retrieve => Call::Retrieve(id_arg(name, args, 0)?),
            Operation::Search => Call::Search(criteria(object_arg(name, args, 0)?)),
            Operation::SearchLike => Call::SearchLike(criteria(object_arg(name, args, 0)?)),
            Operation::CountAll => Call::CountAll,
            Operation::All => Call::All,
            Operation::Columns => match args.first() {
                None | Some(Value::Null) => Call::Columns(ColumnSet::All),
                Some(Value::String(s)) => Call::Columns(ColumnSet::from_name(s).ok_or_else(|| bad(name, format!("unknown column set '{}'", s)))?),
                Some(other) => return Err(bad(name, format!("expected a column set name, got {}", other))),
            },
            Operation::FindColumn => match args.first() {
                Some(Value::String(s)) => Call::FindColumn(s.clone()),
                _ => return Err(bad(name, "expected a column name".into())),
            },
            Operation::Update => Call::Update(id_arg(name, args, 0)?, object_arg(name, args, 1)?),
            Operation::Delete => Call::Delete(id_arg(name, args, 0)?),
            Operation::List => match args.first() {
                None | Some(Value::Null) => Call::List(ListQuery::default()),
                Some(Value::Object(obj)) => Call::List(ListQuery::from_object(obj)),
                Some(other) => return Err(bad(name, format!("expected list options, got {}", other))),
            },
        })
    }
}

fn bad(operation: &'static str, reason: String) -> FactoryError {
    FactoryError::BadArguments { operation, reason }
}

fn object_arg(op: &'static str, args: &[Value], i: usize) -> Result<Row, FactoryError> {
    match args.get(i) {
        Some(Value::Object(obj)) => Ok(obj.clone()),
        None | Some(Value::Null) => Ok(Row::new()),
        Some(other) => Err(bad(op, format!("argument {} must be an object, got {}", i + 1, other))),
    }
}

fn id_arg(op: &'static str, args: &[Value], i: usize) -> Result<Value, FactoryError> {
    match args.get(i) {
        Some(v @ (Value::String(_) | Value::Number(_))) => Ok(v.clone()),
        Some(other) => Err(bad(op, format!("argument {} must be an id, got {}", i + 1, other))),
        None => Err(bad(op, format!("missing id argument {}", i + 1))),
    }
}

fn criteria(obj: Row) -> Vec<(String, Value)> {
    obj.into_iter().collect()
}

/// Result of a dispatched call. Single results stay single.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    /// Unknown moniker or nothing found.
    Nothing,
    One(Entity),
    Many(Vec<Entity>),
    Count(u64),
    Column(String),
    Columns(Vec<String>),
    Page(Pager),
}

impl Outcome {
    pub fn is_nothing(&self) -> bool {
        matches!(self, Outcome::Nothing)
    }

    pub fn into_one(self) -> Option<Entity> {
        match self {
            Outcome::One(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_many(self) -> Vec<Entity> {
        match self {
            Outcome::Many(v) => v,
            Outcome::One(e) => vec![e],
            _ => Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_round_trip_through_the_allow_list() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(op));
        }
        assert_eq!(Operation::from_name("retrieve_all"), Some(Operation::All));
        assert_eq!(Operation::from_name("drop_table"), None);
        assert_eq!(Operation::from_name("Create"), None);
    }

    #[test]
    fn decode_checks_argument_shapes() {
        assert_eq!(
            Call::decode(Operation::Retrieve, &[json!("5")]).unwrap(),
            Call::Retrieve(json!("5"))
        );
        assert!(matches!(
            Call::decode(Operation::Retrieve, &[]),
            Err(FactoryError::BadArguments { operation: "retrieve", .. })
        ));
        assert!(Call::decode(Operation::Create, &[json!([1, 2])]).is_err());
        assert_eq!(
            Call::decode(Operation::Columns, &[json!("primary")]).unwrap(),
            Call::Columns(ColumnSet::Primary)
        );
        let update = Call::decode(Operation::Update, &[json!(3), json!({"title": "T"})]).unwrap();
        assert!(matches!(update, Call::Update(ref id, ref row) if *id == json!(3) && row["title"] == json!("T")));
    }

    #[test]
    fn outcomes_serialize_flat() {
        assert_eq!(Outcome::Nothing.to_value(), Value::Null);
        assert_eq!(Outcome::Count(4).to_value(), json!(4));
        assert_eq!(Outcome::Columns(vec!["id".into()]).to_value(), json!(["id"]));
    }
}
