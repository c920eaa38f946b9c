use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::filter::types::{FilterOp, QueryOptions, SortDirection};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// A count-and-fetch result: `count` is the total number of matching rows
/// before pagination, `rows` the requested page.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub count: u64,
    pub rows: Vec<Value>,
}

/// The persistence boundary. Implementations expose a declared attribute
/// set and the handful of operations the request core composes against.
#[async_trait]
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    /// Declared attribute names; every field referenced in a filter must be
    /// a member of this set.
    fn attributes(&self) -> &BTreeSet<String>;

    async fn find_by_pk(&self, id: &str) -> Result<Option<Value>, ModelError>;

    async fn find_and_count_all(&self, options: &QueryOptions) -> Result<ResultSet, ModelError>;

    async fn create(&self, body: &Value) -> Result<Value, ModelError>;

    async fn save(&self, id: &str, body: &Value) -> Result<Value, ModelError>;

    async fn destroy(&self, id: &str) -> Result<(), ModelError>;
}

/// In-memory model over JSON rows. Evaluates the normalized query shape
/// directly; rows are identified by their `id` attribute.
pub struct MemoryModel {
    name: String,
    attributes: BTreeSet<String>,
    rows: Mutex<Vec<Value>>,
}

impl MemoryModel {
    pub fn new(name: impl Into<String>, attributes: &[&str]) -> Self {
        Self {
            name: name.into(),
            attributes: attributes.iter().map(|s| s.to_string()).collect(),
            rows: Mutex::new(vec![]),
        }
    }

    pub fn with_rows(name: impl Into<String>, attributes: &[&str], rows: Vec<Value>) -> Self {
        let model = Self::new(name, attributes);
        *model.rows.lock().expect("rows lock") = rows;
        model
    }

    fn lock_rows(&self) -> std::sync::MutexGuard<'_, Vec<Value>> {
        match self.rows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn matches(row: &Value, options: &QueryOptions) -> bool {
        options.where_clause.iter().all(|(field, ops)| {
            let actual = row.get(field).unwrap_or(&Value::Null);
            ops.iter().all(|(op, expected)| eval_op(*op, actual, expected))
        })
    }
}

#[async_trait]
impl Model for MemoryModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn attributes(&self) -> &BTreeSet<String> {
        &self.attributes
    }

    async fn find_by_pk(&self, id: &str) -> Result<Option<Value>, ModelError> {
        let rows = self.lock_rows();
        Ok(rows.iter().find(|r| r.get("id").map(id_matches(id)).unwrap_or(false)).cloned())
    }

    async fn find_and_count_all(&self, options: &QueryOptions) -> Result<ResultSet, ModelError> {
        let rows = self.lock_rows();
        let mut matching: Vec<Value> =
            rows.iter().filter(|r| Self::matches(r, options)).cloned().collect();
        let count = matching.len() as u64;

        for (field, direction) in options.order.iter().rev() {
            matching.sort_by(|a, b| {
                let left = a.get(field).unwrap_or(&Value::Null);
                let right = b.get(field).unwrap_or(&Value::Null);
                let ord = compare(left, right);
                match direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        let start = options.offset.unwrap_or(0) as usize;
        let rows = matching
            .into_iter()
            .skip(start)
            .take(options.limit as usize)
            .collect();
        Ok(ResultSet { count, rows })
    }

    async fn create(&self, body: &Value) -> Result<Value, ModelError> {
        let mut record = match body {
            Value::Object(map) => map.clone(),
            _ => return Err(ModelError::InvalidRecord("expected a JSON object".to_string())),
        };
        record
            .entry("id".to_string())
            .or_insert_with(|| Value::from(Uuid::new_v4().to_string()));
        let value = Value::Object(record);
        self.lock_rows().push(value.clone());
        Ok(value)
    }

    async fn save(&self, id: &str, body: &Value) -> Result<Value, ModelError> {
        let updates = match body {
            Value::Object(map) => map.clone(),
            _ => return Err(ModelError::InvalidRecord("expected a JSON object".to_string())),
        };
        let mut rows = self.lock_rows();
        let row = rows
            .iter_mut()
            .find(|r| r.get("id").map(id_matches(id)).unwrap_or(false))
            .ok_or_else(|| ModelError::Storage(format!("no record with id '{}'", id)))?;
        if let Value::Object(existing) = row {
            for (k, v) in updates {
                existing.insert(k, v);
            }
        }
        Ok(row.clone())
    }

    async fn destroy(&self, id: &str) -> Result<(), ModelError> {
        self.lock_rows().retain(|r| !r.get("id").map(id_matches(id)).unwrap_or(false));
        Ok(())
    }
}

fn id_matches(id: &str) -> impl Fn(&Value) -> bool + '_ {
    move |v| match v {
        Value::String(s) => s == id,
        Value::Number(n) => n.to_string() == id,
        _ => false,
    }
}

fn eval_op(op: FilterOp, actual: &Value, expected: &Value) -> bool {
    match op {
        FilterOp::Eq => loose_eq(actual, expected),
        FilterOp::Ne => !loose_eq(actual, expected),
        FilterOp::Gt => compare(actual, expected) == Ordering::Greater,
        FilterOp::Gte => compare(actual, expected) != Ordering::Less,
        FilterOp::Lt => compare(actual, expected) == Ordering::Less,
        FilterOp::Lte => compare(actual, expected) != Ordering::Greater,
        FilterOp::Like => match (actual.as_str(), expected.as_str()) {
            (Some(s), Some(pattern)) => like_match(s, pattern),
            _ => false,
        },
        FilterOp::In => match expected {
            Value::Array(candidates) => candidates.iter().any(|c| loose_eq(actual, c)),
            other => loose_eq(actual, other),
        },
        FilterOp::Nin => match expected {
            Value::Array(candidates) => !candidates.iter().any(|c| loose_eq(actual, c)),
            other => !loose_eq(actual, other),
        },
    }
}

// query string values arrive as strings; compare numbers numerically when
// both sides parse
fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (as_f64(actual), as_f64(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn compare(left: &Value, right: &Value) -> Ordering {
    if let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// SQL LIKE with `%` wildcards.
fn like_match(s: &str, pattern: &str) -> bool {
    let segments: Vec<&str> = pattern.split('%').collect();
    if segments.len() == 1 {
        return s == pattern;
    }
    let mut rest = s;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn actors() -> MemoryModel {
        MemoryModel::with_rows(
            "actor",
            &["id", "first_name", "last_name", "age"],
            vec![
                json!({"id": "1", "first_name": "PENELOPE", "last_name": "GUINESS", "age": 52}),
                json!({"id": "2", "first_name": "NICK", "last_name": "WAHLBERG", "age": 48}),
                json!({"id": "3", "first_name": "ED", "last_name": "CHASE", "age": 61}),
            ],
        )
    }

    fn options(criteria: &[(&str, FilterOp, Value)]) -> QueryOptions {
        let mut where_clause: BTreeMap<String, BTreeMap<FilterOp, Value>> = BTreeMap::new();
        for (field, op, value) in criteria {
            where_clause.entry(field.to_string()).or_default().insert(*op, value.clone());
        }
        QueryOptions { where_clause, limit: 10, offset: None, order: vec![] }
    }

    #[tokio::test]
    async fn find_by_pk_matches_string_and_numeric_ids() {
        let model = actors();
        assert!(model.find_by_pk("2").await.unwrap().is_some());
        assert!(model.find_by_pk("99").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn count_reflects_matches_before_pagination() {
        let model = actors();
        let mut opts = options(&[]);
        opts.limit = 1;
        let set = model.find_and_count_all(&opts).await.unwrap();
        assert_eq!(set.count, 3);
        assert_eq!(set.rows.len(), 1);
    }

    #[tokio::test]
    async fn criteria_and_order_apply() {
        let model = actors();
        let mut opts = options(&[("age", FilterOp::Gt, json!(50))]);
        opts.order = vec![("age".to_string(), SortDirection::Desc)];
        let set = model.find_and_count_all(&opts).await.unwrap();
        assert_eq!(set.count, 2);
        assert_eq!(set.rows[0]["first_name"], "ED");
        assert_eq!(set.rows[1]["first_name"], "PENELOPE");
    }

    #[tokio::test]
    async fn like_and_in_operators() {
        let model = actors();
        let opts = options(&[("last_name", FilterOp::Like, json!("%HA%"))]);
        let set = model.find_and_count_all(&opts).await.unwrap();
        assert_eq!(set.count, 2); // WAHLBERG, CHASE

        let opts = options(&[("first_name", FilterOp::In, json!(["ED", "NICK"]))]);
        let set = model.find_and_count_all(&opts).await.unwrap();
        assert_eq!(set.count, 2);
    }

    #[tokio::test]
    async fn create_assigns_an_id_and_save_merges() {
        let model = actors();
        let created = model.create(&json!({"first_name": "NEW"})).await.unwrap();
        assert!(created["id"].is_string());

        let updated = model.save("1", &json!({"age": 53})).await.unwrap();
        assert_eq!(updated["age"], 53);
        assert_eq!(updated["first_name"], "PENELOPE");

        model.destroy("1").await.unwrap();
        assert!(model.find_by_pk("1").await.unwrap().is_none());
    }
}
