use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators accepted in `$field=operator:value` criteria.
///
/// Flat conjunction only: every criterion is ANDed. Nested and/or grouping
/// is not supported in this version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    Nin,
}

impl FilterOp {
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "eq" => FilterOp::Eq,
            "ne" => FilterOp::Ne,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            "in" => FilterOp::In,
            "nin" => FilterOp::Nin,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::In => "in",
            FilterOp::Nin => "nin",
        }
    }

    /// Whether the operator takes a comma separated value list.
    pub fn takes_list(&self) -> bool {
        matches!(self, FilterOp::In | FilterOp::Nin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl Serialize for SortDirection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_sql())
    }
}

/// Engine-agnostic query shape handed to the model layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOptions {
    #[serde(rename = "where")]
    pub where_clause: BTreeMap<String, BTreeMap<FilterOp, Value>>,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<(String, SortDirection)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_tokens_round_trip() {
        for token in ["eq", "ne", "gt", "gte", "lt", "lte", "like", "in", "nin"] {
            assert_eq!(FilterOp::parse(token).unwrap().as_str(), token);
        }
        assert!(FilterOp::parse("between").is_none());
        assert!(FilterOp::parse("EQ").is_none());
    }

    #[test]
    fn sort_direction_renders_sql_keywords() {
        assert_eq!(SortDirection::parse("asc").unwrap().as_sql(), "ASC");
        assert_eq!(SortDirection::parse("desc").unwrap().as_sql(), "DESC");
        assert!(SortDirection::parse("down").is_none());
    }
}
