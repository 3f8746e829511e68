//! Universal data types for UDOM
//!
//! These types provide a normalized representation of records, filters
//! and query results across SQL and document engines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Universal value representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// A record: field name to value, ordered for deterministic rendering.
///
/// The core enforces no shape invariant; each adapter coerces records into
/// the engine's native row or document form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Comparison operator for predicate conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Compare {
    #[default]
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Compare {
    /// SQL spelling of the operator
    pub fn sql(&self) -> &'static str {
        match self {
            Compare::Eq => "=",
            Compare::Neq => "<>",
            Compare::Gt => ">",
            Compare::Gte => ">=",
            Compare::Lt => "<",
            Compare::Lte => "<=",
        }
    }

    /// MongoDB operator key (`None` for plain equality)
    pub fn mongo(&self) -> Option<&'static str> {
        match self {
            Compare::Eq => None,
            Compare::Neq => Some("$ne"),
            Compare::Gt => Some("$gt"),
            Compare::Gte => Some("$gte"),
            Compare::Lt => Some("$lt"),
            Compare::Lte => Some("$lte"),
        }
    }
}

/// One field comparison inside a predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Compare,
    pub value: Value,
}

/// Engine-agnostic filter: a conjunction of conditions.
///
/// The empty conjunction is the explicit match-all predicate; `delete`
/// requires a predicate so a full-entity delete is never accidental.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub conditions: Vec<Condition>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The explicit match-everything predicate.
    pub fn match_all() -> Self {
        Self::default()
    }

    pub fn and(mut self, field: impl Into<String>, op: Compare, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Shorthand for an equality condition.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(field, Compare::Eq, value)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// Sort direction for ordered finds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Ordering specification for `find`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Identifier returned from `create`: engine-assigned or caller-supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{}", i),
            RecordId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&Value> for Option<RecordId> {
    fn from(value: &Value) -> Self {
        match value {
            Value::Int(i) => Some(RecordId::Int(*i)),
            Value::Text(s) => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }
}

/// Column metadata for raw query results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// A single raw result row (indexed by column order)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

/// Raw result of a native `execute` call.
///
/// No normalization beyond value decoding; the caller owns interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    /// Number of affected rows (for INSERT/UPDATE/DELETE)
    pub affected_rows: Option<u64>,
    /// Execution time in milliseconds
    pub execution_time_ms: f64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: None,
            execution_time_ms: 0.0,
        }
    }

    pub fn with_affected_rows(affected: u64, time_ms: f64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: Some(affected),
            execution_time_ms: time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_builder_joins_conditions() {
        let pred = Predicate::new()
            .eq("name", "ada")
            .and("age", Compare::Gt, 21i64);

        assert_eq!(pred.conditions.len(), 2);
        assert_eq!(pred.conditions[0].op, Compare::Eq);
        assert_eq!(pred.conditions[1].value, Value::Int(21));
        assert!(!pred.is_empty());
        assert!(Predicate::match_all().is_empty());
    }

    #[test]
    fn record_keeps_field_order_stable() {
        let rec = Record::new()
            .with_field("zeta", 1i64)
            .with_field("alpha", "x");

        let keys: Vec<&String> = rec.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["alpha", "zeta"]);
    }

    #[test]
    fn value_serializes_untagged() {
        let v = serde_json::to_string(&Value::Int(3)).unwrap();
        assert_eq!(v, "3");
        let v = serde_json::to_string(&Value::Text("a".into())).unwrap();
        assert_eq!(v, "\"a\"");
    }
}
