//! Framework-shaped parameter and result types.
//!
//! These mirror what an admin UI hands to its data and auth providers. Record
//! payloads stay as `serde_json::Value` because the providers never inspect
//! them beyond the id.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record id: Directus keys are integers or strings (usually UUIDs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Int(i64),
    Str(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Int(n) => write!(f, "{n}"),
            Identifier::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Identifier {
    fn from(n: i64) -> Self {
        Identifier::Int(n)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier::Str(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Identifier::Str(s)
    }
}

impl From<&Identifier> for Value {
    fn from(id: &Identifier) -> Self {
        match id {
            Identifier::Int(n) => Value::from(*n),
            Identifier::Str(s) => Value::from(s.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub per_page: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Desc,
        }
    }
}

impl Default for Sort {
    fn default() -> Self {
        Self::asc("id")
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetListParams {
    pub pagination: Pagination,
    pub sort: Sort,
    /// Filter values keyed by field, in the order the UI produced them.
    pub filter: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetListResult {
    pub data: Vec<Value>,
    pub total: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct GetOneParams {
    pub id: Identifier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetOneResult {
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct GetManyParams {
    pub ids: Vec<Identifier>,
}

/// Records matching the requested ids, in whatever order the backend chose.
#[derive(Debug, Clone, PartialEq)]
pub struct GetManyResult {
    pub data: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct GetManyReferenceParams {
    pub target: String,
    pub id: Identifier,
    pub pagination: Pagination,
    pub sort: Sort,
    pub filter: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct CreateParams {
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateResult {
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct UpdateParams {
    pub id: Identifier,
    pub data: Value,
    pub previous_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct UpdateManyParams {
    pub ids: Vec<Identifier>,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateManyResult {
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct DeleteParams {
    pub id: Identifier,
    pub previous_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    pub data: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct DeleteManyParams {
    pub ids: Vec<Identifier>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteManyResult {
    pub data: Vec<Identifier>,
}

/// The signed-in user as shown by the admin UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub id: Value,
    pub full_name: String,
    pub avatar: Option<String>,
}

/// The backend's `/users/me` record, reduced to what `Identity` needs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DirectusUser {
    pub id: Value,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}
