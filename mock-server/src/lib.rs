//! In-memory stand-in for the parts of the Directus REST API the providers
//! use: auth, current user, roles, the generic items collections and the
//! `/users` system collection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "d1r3ctu5";
pub const ADMIN_ROLE_ID: &str = "role-admin";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar: Option<String>,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshInput {
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateManyInput {
    pub keys: Vec<Value>,
    pub data: Map<String, Value>,
}

/// Everything the server knows, behind one lock.
#[derive(Debug)]
pub struct Backend {
    pub users: Vec<User>,
    pub roles: HashMap<String, String>,
    pub collections: HashMap<String, Vec<Value>>,
    pub refresh_tokens: HashMap<String, String>,
    /// Lifetime of issued access tokens; negative values issue expired tokens.
    pub access_ttl_secs: i64,
    pub refresh_calls: usize,
    next_id: i64,
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            users: Vec::new(),
            roles: HashMap::new(),
            collections: HashMap::new(),
            refresh_tokens: HashMap::new(),
            access_ttl_secs: 900,
            refresh_calls: 0,
            next_id: 1,
        }
    }
}

impl Backend {
    /// One administrator account and its role.
    pub fn seeded() -> Self {
        let mut backend = Self::default();
        backend.roles.insert(ADMIN_ROLE_ID.to_string(), "Administrator".to_string());
        backend.users.push(User {
            id: Uuid::new_v4().to_string(),
            email: ADMIN_EMAIL.to_string(),
            password: ADMIN_PASSWORD.to_string(),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            avatar: Some("avatar-file".to_string()),
            role: Some(ADMIN_ROLE_ID.to_string()),
        });
        backend
    }

    fn issue_tokens(&mut self, user_id: &str) -> Value {
        let exp = now_secs() + self.access_ttl_secs;
        let role = self.users.iter().find(|u| u.id == user_id).and_then(|u| u.role.clone());
        let access_token = encode_token(&json!({"id": user_id, "role": role, "exp": exp}));
        let refresh_token = Uuid::new_v4().simple().to_string();
        self.refresh_tokens.insert(refresh_token.clone(), user_id.to_string());
        json!({
            "access_token": access_token,
            "refresh_token": refresh_token,
            "expires": self.access_ttl_secs * 1000,
        })
    }

    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

pub type Db = Arc<RwLock<Backend>>;

pub fn app() -> Router {
    app_with(Arc::new(RwLock::new(Backend::seeded())))
}

pub fn app_with(db: Db) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/users", get(list_users))
        .route("/users/me", get(current_user))
        .route("/roles/{id}", get(get_role))
        .route(
            "/items/{collection}",
            get(list_items).post(create_item).patch(update_items).delete(delete_items),
        )
        .route(
            "/items/{collection}/{id}",
            get(get_item).patch(update_item).delete(delete_item),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with(listener: TcpListener, db: Db) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(db)).await
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Unsigned JWT-shaped token carrying `claims`.
pub fn encode_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.mock")
}

fn decode_token(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// A Directus-style error body.
#[derive(Debug)]
struct Failure {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl Failure {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "ROUTE_NOT_FOUND", "Not found")
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let body = json!({"errors": [{"message": self.message, "extensions": {"code": self.code}}]});
        (self.status, Json(body)).into_response()
    }
}

/// Resolve the bearer token to a user id.
fn authorize(backend: &Backend, headers: &HeaderMap) -> Result<String, Failure> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| Failure::new(StatusCode::FORBIDDEN, "FORBIDDEN", "You don't have permission to access this."))?;
    let claims = decode_token(token)
        .ok_or_else(|| Failure::new(StatusCode::UNAUTHORIZED, "INVALID_TOKEN", "Invalid token."))?;
    let exp = claims["exp"].as_i64().unwrap_or(0);
    if exp < now_secs() {
        return Err(Failure::new(StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED", "Token expired."));
    }
    let id = claims["id"].as_str().unwrap_or_default();
    if backend.users.iter().any(|u| u.id == id) {
        Ok(id.to_string())
    } else {
        Err(Failure::new(StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", "Invalid user."))
    }
}

async fn login(State(db): State<Db>, Json(input): Json<LoginInput>) -> Result<Json<Value>, Failure> {
    let mut backend = db.write().await;
    let user_id = backend
        .users
        .iter()
        .find(|u| u.email == input.email && u.password == input.password)
        .map(|u| u.id.clone())
        .ok_or_else(|| Failure::new(StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", "Invalid user credentials."))?;
    tracing::info!(email = %input.email, "login");
    Ok(Json(json!({"data": backend.issue_tokens(&user_id)})))
}

async fn refresh(State(db): State<Db>, Json(input): Json<RefreshInput>) -> Result<Json<Value>, Failure> {
    let mut backend = db.write().await;
    backend.refresh_calls += 1;
    if input.mode.as_deref().is_some_and(|mode| mode != "json") {
        return Err(Failure::new(StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", "Only json mode is supported."));
    }
    let user_id = input
        .refresh_token
        .and_then(|token| backend.refresh_tokens.remove(&token))
        .ok_or_else(|| Failure::new(StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", "Invalid user credentials."))?;
    Ok(Json(json!({"data": backend.issue_tokens(&user_id)})))
}

async fn logout(State(db): State<Db>, Json(input): Json<RefreshInput>) -> Result<StatusCode, Failure> {
    let mut backend = db.write().await;
    input
        .refresh_token
        .and_then(|token| backend.refresh_tokens.remove(&token))
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| Failure::new(StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", "Invalid refresh token."))
}

async fn current_user(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Value>, Failure> {
    let backend = db.read().await;
    let id = authorize(&backend, &headers)?;
    let user = backend.users.iter().find(|u| u.id == id).ok_or_else(Failure::not_found)?;
    Ok(Json(json!({"data": user})))
}

async fn list_users(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, Failure> {
    let backend = db.read().await;
    authorize(&backend, &headers)?;
    let records: Vec<Value> = backend
        .users
        .iter()
        .filter_map(|u| serde_json::to_value(u).ok())
        .collect();
    Ok(Json(apply_query(records, &query)?))
}

async fn get_role(State(db): State<Db>, headers: HeaderMap, Path(id): Path<String>) -> Result<Json<Value>, Failure> {
    let backend = db.read().await;
    authorize(&backend, &headers)?;
    let name = backend.roles.get(&id).ok_or_else(Failure::not_found)?;
    Ok(Json(json!({"data": {"id": id, "name": name}})))
}

async fn list_items(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(collection): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, Failure> {
    let backend = db.read().await;
    authorize(&backend, &headers)?;
    let records = backend.collections.get(&collection).cloned().unwrap_or_default();
    Ok(Json(apply_query(records, &query)?))
}

async fn create_item(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(collection): Path<String>,
    Json(mut input): Json<Map<String, Value>>,
) -> Result<Json<Value>, Failure> {
    let mut backend = db.write().await;
    authorize(&backend, &headers)?;
    if !input.contains_key("id") {
        let id = backend.next_id();
        input.insert("id".to_string(), Value::from(id));
    }
    let record = Value::Object(input);
    backend.collections.entry(collection).or_default().push(record.clone());
    Ok(Json(json!({"data": record})))
}

async fn get_item(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Value>, Failure> {
    let backend = db.read().await;
    authorize(&backend, &headers)?;
    let record = backend
        .collections
        .get(&collection)
        .and_then(|records| records.iter().find(|r| same_key(&r["id"], &Value::String(id.clone()))))
        .ok_or_else(Failure::not_found)?;
    Ok(Json(json!({"data": record})))
}

async fn update_item(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((collection, id)): Path<(String, String)>,
    Json(patch): Json<Map<String, Value>>,
) -> Result<Json<Value>, Failure> {
    let mut backend = db.write().await;
    authorize(&backend, &headers)?;
    let record = backend
        .collections
        .get_mut(&collection)
        .and_then(|records| records.iter_mut().find(|r| same_key(&r["id"], &Value::String(id.clone()))))
        .ok_or_else(Failure::not_found)?;
    merge(record, &patch);
    Ok(Json(json!({"data": record})))
}

async fn update_items(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(collection): Path<String>,
    Json(input): Json<UpdateManyInput>,
) -> Result<Json<Value>, Failure> {
    let mut backend = db.write().await;
    authorize(&backend, &headers)?;
    let records = backend.collections.entry(collection).or_default();
    let mut updated = Vec::new();
    for record in records.iter_mut() {
        if input.keys.iter().any(|key| same_key(&record["id"], key)) {
            merge(record, &input.data);
            updated.push(record.clone());
        }
    }
    Ok(Json(json!({"data": updated})))
}

async fn delete_item(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode, Failure> {
    let mut backend = db.write().await;
    authorize(&backend, &headers)?;
    let records = backend.collections.get_mut(&collection).ok_or_else(Failure::not_found)?;
    let before = records.len();
    records.retain(|r| !same_key(&r["id"], &Value::String(id.clone())));
    if records.len() == before {
        return Err(Failure::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_items(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(collection): Path<String>,
    Json(keys): Json<Vec<Value>>,
) -> Result<StatusCode, Failure> {
    let mut backend = db.write().await;
    authorize(&backend, &headers)?;
    if let Some(records) = backend.collections.get_mut(&collection) {
        records.retain(|r| !keys.iter().any(|key| same_key(&r["id"], key)));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn merge(record: &mut Value, patch: &Map<String, Value>) {
    if let Value::Object(fields) = record {
        for (key, value) in patch {
            if key != "id" {
                fields.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Apply `filter`, `search`, `sort`, `page`, `limit` and `meta` to `records`.
fn apply_query(records: Vec<Value>, query: &HashMap<String, String>) -> Result<Value, Failure> {
    let filter = match query.get("filter") {
        Some(raw) => Some(serde_json::from_str::<Value>(raw).map_err(|_| {
            Failure::new(StatusCode::BAD_REQUEST, "INVALID_QUERY", "Invalid filter.")
        })?),
        None => None,
    };
    let mut matching: Vec<Value> = records
        .into_iter()
        .filter(|r| filter.as_ref().is_none_or(|f| matches_filter(f, r)))
        .filter(|r| query.get("search").is_none_or(|term| matches_search(term, r)))
        .collect();

    if let Some(sort) = query.get("sort").filter(|s| !s.is_empty()) {
        let (field, descending) = match sort.strip_prefix('-') {
            Some(field) => (field, true),
            None => (sort.as_str(), false),
        };
        matching.sort_by(|a, b| {
            let ordering = compare_values(&a[field], &b[field]);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    let filter_count = matching.len();
    let limit: i64 = query.get("limit").and_then(|l| l.parse().ok()).unwrap_or(100);
    let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1).max(1);
    let data: Vec<Value> = match usize::try_from(limit) {
        Ok(limit) => matching.into_iter().skip((page - 1) * limit).take(limit).collect(),
        Err(_) => matching,
    };

    let mut body = json!({"data": data});
    if query.contains_key("meta") {
        body["meta"] = json!({"filter_count": filter_count});
    }
    Ok(body)
}

/// Evaluate a Directus filter tree against one record.
pub fn matches_filter(filter: &Value, record: &Value) -> bool {
    let Some(nodes) = filter.as_object() else {
        return true;
    };
    nodes.iter().all(|(key, condition)| match key.as_str() {
        "_and" => condition
            .as_array()
            .is_some_and(|members| members.iter().all(|m| matches_filter(m, record))),
        "_or" => condition
            .as_array()
            .is_some_and(|members| members.iter().any(|m| matches_filter(m, record))),
        field => condition.as_object().is_some_and(|ops| {
            let actual = record.get(field).unwrap_or(&Value::Null);
            ops.iter().all(|(op, operand)| compare(op, actual, operand))
        }),
    })
}

fn compare(op: &str, actual: &Value, operand: &Value) -> bool {
    match op {
        "_eq" => same_key(actual, operand),
        "_neq" => !same_key(actual, operand),
        "_contains" => match actual {
            Value::Array(items) => items.iter().any(|item| same_key(item, operand)),
            Value::Null => false,
            other => scalar_text(other).contains(&scalar_text(operand)),
        },
        "_in" => operand.as_array().is_some_and(|set| set.iter().any(|v| same_key(actual, v))),
        "_nin" => operand.as_array().is_some_and(|set| !set.iter().any(|v| same_key(actual, v))),
        "_gt" => compare_values(actual, operand).is_gt(),
        "_gte" => compare_values(actual, operand).is_ge(),
        "_lt" => compare_values(actual, operand).is_lt(),
        "_lte" => compare_values(actual, operand).is_le(),
        _ => false,
    }
}

fn matches_search(term: &str, record: &Value) -> bool {
    let term = term.to_lowercase();
    record.as_object().is_some_and(|fields| {
        fields
            .values()
            .any(|v| v.is_string() && scalar_text(v).to_lowercase().contains(&term))
    })
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Equality across JSON types, so `"3"` from a URL matches the number `3`.
fn same_key(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(_), Value::Number(_)) | (Value::Number(_), Value::String(_)) => {
            scalar_text(a) == scalar_text(b)
        }
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => match (a, b) {
            (Value::Null, Value::Null) => std::cmp::Ordering::Equal,
            (Value::Null, _) => std::cmp::Ordering::Less,
            (_, Value::Null) => std::cmp::Ordering::Greater,
            _ => scalar_text(a).cmp(&scalar_text(b)),
        },
    }
}
