//! Translation of admin-UI list parameters into Directus query parameters.
//!
//! # Design
//! The UI hands over a flat map of filter values. Two keys (`q`, `search`)
//! carry the free-text search; every other key is a field filter, optionally
//! suffixed with `/operator`. Each field filter becomes one
//! `{field: {operator: value}}` clause. Two or more clauses are always wrapped
//! in an explicit `_and` node, so clauses on the same field never collide.

use serde_json::{Map, Value};

use crate::types::{Pagination, Sort, SortOrder};

const SEARCH_KEYS: [&str; 2] = ["search", "q"];

/// Backend filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    /// `{field: {operator: value}}`
    Field {
        field: String,
        operator: String,
        value: Value,
    },
    /// `{"_and": [...]}`
    And(Vec<FilterExpression>),
}

impl FilterExpression {
    pub fn field(field: &str, operator: &str, value: Value) -> Self {
        FilterExpression::Field {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    /// The JSON tree sent as the `filter` query parameter.
    pub fn to_value(&self) -> Value {
        match self {
            FilterExpression::Field { field, operator, value } => {
                let mut clause = Map::new();
                clause.insert(operator.clone(), value.clone());
                let mut node = Map::new();
                node.insert(field.clone(), Value::Object(clause));
                Value::Object(node)
            }
            FilterExpression::And(members) => {
                let mut node = Map::new();
                node.insert(
                    "_and".to_string(),
                    Value::Array(members.iter().map(FilterExpression::to_value).collect()),
                );
                Value::Object(node)
            }
        }
    }
}

/// Split the UI filter into the search term and the ordered field filters.
///
/// `search` wins over `q`. Numbers and booleans are sent as their text;
/// empty strings, nulls and containers do not count as a search term.
pub fn split_filter(filter: &Map<String, Value>) -> (Option<String>, Vec<(String, Value)>) {
    let search = SEARCH_KEYS
        .iter()
        .filter_map(|key| filter.get(*key))
        .find_map(search_term);
    let fields = filter
        .iter()
        .filter(|(key, _)| !SEARCH_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    (search, fields)
}

fn search_term(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Build a single clause from a UI filter key.
///
/// `price/_gte` yields operator `_gte` whatever the value; a bare key yields
/// `_eq` for booleans and `_contains` for everything else.
pub fn field_clause(key: &str, value: Value) -> FilterExpression {
    if let Some((field, operator)) = key.split_once('/') {
        if !operator.is_empty() {
            return FilterExpression::field(field, operator, value);
        }
        return FilterExpression::field(field, default_operator(&value), value);
    }
    FilterExpression::field(key, default_operator(&value), value)
}

fn default_operator(value: &Value) -> &'static str {
    if value.is_boolean() {
        "_eq"
    } else {
        "_contains"
    }
}

/// Combine field filters into the backend filter tree.
///
/// No filters yields `None`; one yields a bare clause; more yield an `_and`
/// node whose members keep the input order.
pub fn generate_filter(fields: Vec<(String, Value)>) -> Option<FilterExpression> {
    let mut clauses: Vec<FilterExpression> = fields
        .into_iter()
        .map(|(key, value)| field_clause(&key, value))
        .collect();
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(FilterExpression::And(clauses)),
    }
}

/// `field` for ascending, `-field` for descending.
pub fn sort_param(sort: &Sort) -> String {
    match sort.order {
        SortOrder::Asc => sort.field.clone(),
        SortOrder::Desc => format!("-{}", sort.field),
    }
}

/// Query parameters understood by the Directus items endpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub search: Option<String>,
    pub filter: Option<FilterExpression>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub sort: Option<String>,
    pub meta: Option<String>,
}

impl ListQuery {
    /// Query for a paginated, sorted list with the filtered total requested.
    pub fn paginated(
        search: Option<String>,
        filter: Option<FilterExpression>,
        pagination: Pagination,
        sort: &Sort,
    ) -> Self {
        let sort = if sort.field.is_empty() {
            None
        } else {
            Some(sort_param(sort))
        };
        Self {
            search,
            filter,
            page: Some(pagination.page),
            limit: Some(pagination.per_page),
            sort,
            meta: Some("*".to_string()),
        }
    }

    /// Encode as a query string with keys in alphabetical order. Absent
    /// parameters are omitted.
    pub fn to_query_string(&self) -> String {
        let filter = self.filter.as_ref().map(|f| f.to_value().to_string());
        let params = [
            ("filter", filter),
            ("limit", self.limit.map(|n| n.to_string())),
            ("meta", self.meta.clone()),
            ("page", self.page.map(|n| n.to_string())),
            ("search", self.search.clone()),
            ("sort", self.sort.clone()),
        ];
        params
            .iter()
            .filter_map(|(key, value)| {
                value
                    .as_ref()
                    .map(|v| format!("{key}={}", urlencoding::encode(v)))
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}
