use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::{codes, ApiError, ErrorKind};
use crate::model::{Model, ResultSet};

use super::fields::FieldSpec;
use super::types::{FilterOp, QueryOptions, SortDirection};

/// A compiled list request: pagination, ordering, named pre-filters,
/// per-field criteria and field projection, validated against the target
/// model's declared attributes before any store access happens.
///
/// Query string grammar (all keys optional):
///
/// - `limit` : resultset size, default 10, between 1 and 200
/// - `offset` : start position, between 0 and 10 000
/// - `marker` : opaque cursor for large datasets, excludes offset and order
/// - `filters` : comma separated list of pre-defined filter names
/// - `order` : `field[:asc|desc]` list, e.g. `?order=age:desc,name`
/// - `fields` : projection list, e.g. `?fields=title,author.name`
/// - `$column=operator:value` : criterion, e.g. `?$age=gt:6` means `age > 6`;
///   criteria aggregate with AND
#[derive(Debug, Clone)]
pub struct ListFilter {
    limit: u32,
    offset: Option<u32>,
    marker: Option<String>,
    order: Vec<(String, SortDirection)>,
    pre_filters: Vec<String>,
    criteria: BTreeMap<String, BTreeMap<FilterOp, Value>>,
    fields: Option<FieldSpec>,
}

impl ListFilter {
    /// Compile decoded query pairs against a model's attribute set.
    pub fn compile(
        attributes: &BTreeSet<String>,
        pairs: &[(String, String)],
    ) -> Result<Self, ApiError> {
        let mut filter = Self {
            limit: 10,
            offset: None,
            marker: None,
            order: vec![],
            pre_filters: vec![],
            criteria: BTreeMap::new(),
            fields: None,
        };

        if let Some(raw) = first(pairs, "limit") {
            let limit: i64 = raw.parse().map_err(|_| {
                ApiError::bad_format("Bad limit format, expecting a number", codes::LIMIT_NOT_NUMERIC)
            })?;
            if !(1..=200).contains(&limit) {
                return Err(ApiError::bad_format(
                    "Bad limit value, expecting between 1 and 200",
                    codes::LIMIT_OUT_OF_RANGE,
                ));
            }
            filter.limit = limit as u32;
        }

        if let Some(raw) = first(pairs, "offset") {
            let offset: i64 = raw.parse().map_err(|_| {
                ApiError::bad_format("Bad offset format, expecting a number", codes::OFFSET_NOT_NUMERIC)
            })?;
            if !(0..=10_000).contains(&offset) {
                return Err(ApiError::bad_format(
                    "Bad offset value, expecting between 0 and 10 000",
                    codes::OFFSET_OUT_OF_RANGE,
                ));
            }
            filter.offset = Some(offset as u32);
        }

        if let Some(marker) = first(pairs, "marker") {
            if filter.offset.is_some() {
                return Err(ApiError::conflicts(
                    "Marker and offset are mutually exclusive",
                    codes::MARKER_OFFSET_CONFLICT,
                ));
            }
            filter.marker = Some(marker.to_string());
        }

        if let Some(csv) = first(pairs, "filters") {
            for name in csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if filter.pre_filters.iter().any(|f| f == name) {
                    return Err(ApiError::bad_argument(
                        format!("Duplicate filter '{}'", name),
                        codes::PREFILTER_DUPLICATE,
                    ));
                }
                filter.pre_filters.push(name.to_string());
            }
        }

        if let Some(csv) = first(pairs, "order") {
            for item in csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let (field, direction) = match item.split_once(':') {
                    Some((field, token)) => {
                        let direction = SortDirection::parse(token).ok_or_else(|| {
                            ApiError::bad_format(
                                format!("Bad sort direction '{}', expecting asc or desc", token),
                                codes::ORDER_BAD_DIRECTION,
                            )
                        })?;
                        (field, direction)
                    }
                    None => (item, SortDirection::Asc),
                };
                if !attributes.contains(field) {
                    return Err(ApiError::bad_argument(
                        format!("Unknown field '{}' in order", field),
                        codes::ORDER_UNKNOWN_FIELD,
                    ));
                }
                filter.order.push((field.to_string(), direction));
            }
            if filter.marker.is_some() && !filter.order.is_empty() {
                return Err(ApiError::conflicts(
                    "Marker and order are mutually exclusive",
                    codes::MARKER_ORDER_CONFLICT,
                ));
            }
        }

        if let Some(csv) = first(pairs, "fields") {
            filter.fields = Some(FieldSpec::parse(csv, Some(attributes))?);
        }

        for (key, value) in pairs {
            let Some(field) = key.strip_prefix('$') else {
                continue;
            };
            if !attributes.contains(field) {
                return Err(ApiError::bad_argument(
                    format!("Unknown field '{}' in criteria", field),
                    codes::CRITERIA_UNKNOWN_FIELD,
                ));
            }
            let (token, raw) = value.split_once(':').unwrap_or((value.as_str(), ""));
            let op = FilterOp::parse(token).ok_or_else(|| {
                ApiError::bad_argument(
                    format!("Unsupported operator '{}'", token),
                    codes::CRITERIA_UNKNOWN_OPERATOR,
                )
            })?;
            let parsed = if op.takes_list() {
                Value::Array(raw.split(',').map(scalar).collect())
            } else {
                scalar(raw)
            };
            filter.criteria.entry(field.to_string()).or_default().insert(op, parsed);
        }

        Ok(filter)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    pub fn order(&self) -> &[(String, SortDirection)] {
        &self.order
    }

    pub fn pre_filters(&self) -> &[String] {
        &self.pre_filters
    }

    pub fn fields(&self) -> Option<&FieldSpec> {
        self.fields.as_ref()
    }

    /// Add a criterion programmatically, bypassing the query string.
    pub fn set_criteria(&mut self, field: impl Into<String>, op: FilterOp, value: Value) -> &mut Self {
        self.criteria.entry(field.into()).or_default().insert(op, value);
        self
    }

    /// Normalized, engine-agnostic query shape.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            where_clause: self.criteria.clone(),
            limit: self.limit,
            offset: self.offset,
            order: self.order.clone(),
        }
    }

    /// Count-and-fetch through the model boundary.
    pub async fn find(&self, model: &dyn Model) -> Result<ResultSet, ApiError> {
        model.find_and_count_all(&self.query_options()).await.map_err(|e| {
            ApiError::internal("List lookup failed", ErrorKind::Internal.default_code()).with_cause(e)
        })
    }
}

fn first<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// Criteria values keep their query string form unless they parse cleanly
/// as a number or boolean.
fn scalar(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::from(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> BTreeSet<String> {
        ["first_name", "last_name", "last_update", "age"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_apply_when_query_is_empty() {
        let filter = ListFilter::compile(&attrs(), &[]).unwrap();
        assert_eq!(filter.limit(), 10);
        assert_eq!(filter.offset(), None);
        assert!(filter.order().is_empty());
    }

    #[test]
    fn limit_bounds_are_enforced() {
        for raw in ["1", "200", "25"] {
            assert!(ListFilter::compile(&attrs(), &pairs(&[("limit", raw)])).is_ok());
        }
        let err = ListFilter::compile(&attrs(), &pairs(&[("limit", "abc")])).unwrap_err();
        assert_eq!(err.code(), 2410);
        for raw in ["0", "201", "-5"] {
            let err = ListFilter::compile(&attrs(), &pairs(&[("limit", raw)])).unwrap_err();
            assert_eq!(err.code(), 2411);
        }
    }

    #[test]
    fn offset_bounds_are_enforced() {
        let err = ListFilter::compile(&attrs(), &pairs(&[("offset", "x")])).unwrap_err();
        assert_eq!(err.code(), 2420);
        let err = ListFilter::compile(&attrs(), &pairs(&[("offset", "10001")])).unwrap_err();
        assert_eq!(err.code(), 2421);
    }

    #[test]
    fn marker_conflicts_with_offset_and_order() {
        let err = ListFilter::compile(&attrs(), &pairs(&[("offset", "10"), ("marker", "abc")]))
            .unwrap_err();
        assert_eq!(err.code(), 2422);

        let err = ListFilter::compile(&attrs(), &pairs(&[("marker", "abc"), ("order", "age")]))
            .unwrap_err();
        assert_eq!(err.code(), 2450);
    }

    #[test]
    fn order_parses_direction_tokens() {
        let filter = ListFilter::compile(
            &attrs(),
            &pairs(&[("order", "last_name:desc,first_name")]),
        )
        .unwrap();
        assert_eq!(
            filter.order(),
            &[
                ("last_name".to_string(), SortDirection::Desc),
                ("first_name".to_string(), SortDirection::Asc),
            ]
        );
    }

    #[test]
    fn order_rejects_unknown_field_and_bad_direction() {
        let err = ListFilter::compile(&attrs(), &pairs(&[("order", "height:asc")])).unwrap_err();
        assert_eq!(err.code(), 2451);
        let err = ListFilter::compile(&attrs(), &pairs(&[("order", "age:down")])).unwrap_err();
        assert_eq!(err.code(), 2452);
    }

    #[test]
    fn duplicate_pre_filter_is_rejected() {
        let err = ListFilter::compile(&attrs(), &pairs(&[("filters", "top,top")])).unwrap_err();
        assert_eq!(err.code(), 2440);
        let filter =
            ListFilter::compile(&attrs(), &pairs(&[("filters", "top,recent")])).unwrap();
        assert_eq!(filter.pre_filters(), &["top".to_string(), "recent".to_string()]);
    }

    #[test]
    fn criteria_validate_field_and_operator() {
        let err = ListFilter::compile(&attrs(), &pairs(&[("$height", "gt:6")])).unwrap_err();
        assert_eq!(err.code(), 2460);
        let err = ListFilter::compile(&attrs(), &pairs(&[("$age", "near:6")])).unwrap_err();
        assert_eq!(err.code(), 2461);
        // a bare value has no operator token
        let err = ListFilter::compile(&attrs(), &pairs(&[("$age", "6")])).unwrap_err();
        assert_eq!(err.code(), 2461);
    }

    #[test]
    fn named_pre_filters_resolve_to_extra_criteria() {
        let mut filter =
            ListFilter::compile(&attrs(), &pairs(&[("filters", "adults")])).unwrap();
        if filter.pre_filters().contains(&"adults".to_string()) {
            filter.set_criteria("age", FilterOp::Gte, Value::from(18));
        }
        let options = filter.query_options();
        assert_eq!(options.where_clause["age"][&FilterOp::Gte], Value::from(18));
    }

    #[test]
    fn criteria_values_coerce_and_lists_split() {
        let filter = ListFilter::compile(
            &attrs(),
            &pairs(&[("$age", "gt:6"), ("$first_name", "in:ALICE,BOB")]),
        )
        .unwrap();
        let options = filter.query_options();
        assert_eq!(options.where_clause["age"][&FilterOp::Gt], Value::from(6));
        assert_eq!(
            options.where_clause["first_name"][&FilterOp::In],
            serde_json::json!(["ALICE", "BOB"])
        );
    }

    #[test]
    fn query_options_reflect_pagination_and_order() {
        let filter = ListFilter::compile(
            &attrs(),
            &pairs(&[("limit", "5"), ("offset", "20"), ("order", "last_name:desc")]),
        )
        .unwrap();
        let options = filter.query_options();
        assert_eq!(options.limit, 5);
        assert_eq!(options.offset, Some(20));
        assert_eq!(options.order.len(), 1);
        assert_eq!(options.order[0].1.as_sql(), "DESC");
    }
}
