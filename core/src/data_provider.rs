//! Data provider for the Directus REST API.
//!
//! # Design
//! Each framework operation is split into a `build_*` method that produces an
//! `HttpRequest` and a `parse_*` method that consumes the `HttpResponse`. Both
//! halves are pure; the `DataProvider` impl joins them through the injected
//! transport. Resource names go through `resource_endpoint` everywhere.
//!
//! ```text
//! get_list           => GET    /items/posts?limit=10&meta=*&page=1&sort=title
//! get_one            => GET    /items/posts/123
//! get_many           => GET    /items/posts?filter={"id":{"_in":[1,2]}}
//! get_many_reference => GET    /items/posts?filter={"author_id":{"_eq":119}}&...
//! create             => POST   /items/posts
//! update             => PATCH  /items/posts/123
//! update_many        => PATCH  /items/posts        {"keys":[...],"data":{...}}
//! delete             => DELETE /items/posts/123
//! delete_many        => DELETE /items/posts        [1,2,3]
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::endpoint::{record_endpoint, resource_endpoint};
use crate::error::ApiError;
use crate::filter::{generate_filter, split_filter, FilterExpression, ListQuery};
use crate::http::{check_status, parse_body, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::provider::DataProvider;
use crate::types::{
    CreateParams, CreateResult, DeleteManyParams, DeleteManyResult, DeleteParams, DeleteResult,
    GetListParams, GetListResult, GetManyParams, GetManyReferenceParams, GetManyResult,
    GetOneParams, GetOneResult, UpdateManyParams, UpdateManyResult, UpdateParams,
    UpdateResult,
};

#[derive(Deserialize)]
struct ListEnvelope {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    meta: Option<ListMeta>,
}

#[derive(Deserialize)]
struct ListMeta {
    #[serde(default)]
    filter_count: Option<Value>,
}

#[derive(Deserialize)]
struct DataEnvelope {
    #[serde(default)]
    data: Value,
}

/// `DataProvider` backed by a Directus instance.
#[derive(Clone)]
pub struct DirectusDataProvider {
    api_base_url: String,
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for DirectusDataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectusDataProvider")
            .field("api_base_url", &self.api_base_url)
            .finish_non_exhaustive()
    }
}

impl DirectusDataProvider {
    pub fn new(api_base_url: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            transport,
        }
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    fn list_request(&self, resource: &str, query: &ListQuery) -> HttpRequest {
        let endpoint = resource_endpoint(&self.api_base_url, resource);
        let query = query.to_query_string();
        if query.is_empty() {
            HttpRequest::get(endpoint)
        } else {
            HttpRequest::get(format!("{endpoint}?{query}"))
        }
    }

    pub fn build_get_list(&self, resource: &str, params: &GetListParams) -> HttpRequest {
        let (search, fields) = split_filter(&params.filter);
        let query = ListQuery::paginated(search, generate_filter(fields), params.pagination, &params.sort);
        self.list_request(resource, &query)
    }

    pub fn build_get_one(&self, resource: &str, params: &GetOneParams) -> HttpRequest {
        HttpRequest::get(record_endpoint(&self.api_base_url, resource, &params.id))
    }

    pub fn build_get_many(&self, resource: &str, params: &GetManyParams) -> HttpRequest {
        let ids: Vec<Value> = params.ids.iter().map(Value::from).collect();
        let query = ListQuery {
            filter: Some(FilterExpression::field("id", "_in", Value::Array(ids))),
            ..ListQuery::default()
        };
        self.list_request(resource, &query)
    }

    /// Like `build_get_list`, with `target = id` joined to the other field
    /// filters.
    pub fn build_get_many_reference(&self, resource: &str, params: &GetManyReferenceParams) -> HttpRequest {
        let (search, mut fields) = split_filter(&params.filter);
        fields.push((format!("{}/_eq", params.target), Value::from(&params.id)));
        let query = ListQuery::paginated(search, generate_filter(fields), params.pagination, &params.sort);
        self.list_request(resource, &query)
    }

    pub fn build_create(&self, resource: &str, params: &CreateParams) -> Result<HttpRequest, ApiError> {
        HttpRequest::json(
            HttpMethod::Post,
            resource_endpoint(&self.api_base_url, resource),
            &params.data,
        )
    }

    pub fn build_update(&self, resource: &str, params: &UpdateParams) -> Result<HttpRequest, ApiError> {
        HttpRequest::json(
            HttpMethod::Patch,
            record_endpoint(&self.api_base_url, resource, &params.id),
            &params.data,
        )
    }

    pub fn build_update_many(&self, resource: &str, params: &UpdateManyParams) -> Result<HttpRequest, ApiError> {
        HttpRequest::json(
            HttpMethod::Patch,
            resource_endpoint(&self.api_base_url, resource),
            &json!({ "keys": params.ids, "data": params.data }),
        )
    }

    pub fn build_delete(&self, resource: &str, params: &DeleteParams) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Delete,
            url: record_endpoint(&self.api_base_url, resource, &params.id),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn build_delete_many(&self, resource: &str, params: &DeleteManyParams) -> Result<HttpRequest, ApiError> {
        HttpRequest::json(
            HttpMethod::Delete,
            resource_endpoint(&self.api_base_url, resource),
            &params.ids,
        )
    }

    pub fn parse_get_list(&self, response: &HttpResponse) -> Result<GetListResult, ApiError> {
        check_status(response)?;
        let envelope: ListEnvelope = parse_body(response)?;
        let total = envelope
            .meta
            .and_then(|meta| meta.filter_count)
            .and_then(|count| parse_count(&count));
        Ok(GetListResult {
            data: envelope.data,
            total,
        })
    }

    pub fn parse_get_one(&self, response: &HttpResponse) -> Result<GetOneResult, ApiError> {
        Ok(GetOneResult {
            data: parse_data(response)?,
        })
    }

    pub fn parse_get_many(&self, response: &HttpResponse) -> Result<GetManyResult, ApiError> {
        let list = self.parse_get_list(response)?;
        Ok(GetManyResult { data: list.data })
    }

    pub fn parse_create(&self, response: &HttpResponse) -> Result<CreateResult, ApiError> {
        Ok(CreateResult {
            data: parse_data(response)?,
        })
    }

    pub fn parse_update(&self, response: &HttpResponse) -> Result<UpdateResult, ApiError> {
        Ok(UpdateResult {
            data: parse_data(response)?,
        })
    }

    pub fn parse_update_many(&self, response: &HttpResponse) -> Result<UpdateManyResult, ApiError> {
        Ok(UpdateManyResult {
            data: parse_data(response)?,
        })
    }

    /// Deletes carry no body; the caller's copy of the record is echoed back.
    pub fn parse_delete(&self, response: &HttpResponse, params: DeleteParams) -> Result<DeleteResult, ApiError> {
        check_status(response)?;
        Ok(DeleteResult {
            data: params.previous_data,
        })
    }

    pub fn parse_delete_many(
        &self,
        response: &HttpResponse,
        params: DeleteManyParams,
    ) -> Result<DeleteManyResult, ApiError> {
        check_status(response)?;
        Ok(DeleteManyResult { data: params.ids })
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        tracing::debug!(method = request.method.as_str(), url = %request.url, "directus request");
        self.transport.execute(request).await
    }
}

/// `data` from a `{data: ...}` envelope; an empty 2xx body reads as null.
fn parse_data(response: &HttpResponse) -> Result<Value, ApiError> {
    check_status(response)?;
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    let envelope: DataEnvelope = parse_body(response)?;
    Ok(envelope.data)
}

/// Directus reports counts as numbers, or as strings on some databases.
fn parse_count(count: &Value) -> Option<u64> {
    match count {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl DataProvider for DirectusDataProvider {
    async fn get_list(&self, resource: &str, params: GetListParams) -> Result<GetListResult, ApiError> {
        let response = self.send(self.build_get_list(resource, &params)).await?;
        self.parse_get_list(&response)
    }

    async fn get_one(&self, resource: &str, params: GetOneParams) -> Result<GetOneResult, ApiError> {
        let response = self.send(self.build_get_one(resource, &params)).await?;
        self.parse_get_one(&response)
    }

    async fn get_many(&self, resource: &str, params: GetManyParams) -> Result<GetManyResult, ApiError> {
        let response = self.send(self.build_get_many(resource, &params)).await?;
        self.parse_get_many(&response)
    }

    async fn get_many_reference(
        &self,
        resource: &str,
        params: GetManyReferenceParams,
    ) -> Result<GetListResult, ApiError> {
        let response = self.send(self.build_get_many_reference(resource, &params)).await?;
        self.parse_get_list(&response)
    }

    async fn create(&self, resource: &str, params: CreateParams) -> Result<CreateResult, ApiError> {
        let response = self.send(self.build_create(resource, &params)?).await?;
        self.parse_create(&response)
    }

    async fn update(&self, resource: &str, params: UpdateParams) -> Result<UpdateResult, ApiError> {
        let response = self.send(self.build_update(resource, &params)?).await?;
        self.parse_update(&response)
    }

    async fn update_many(
        &self,
        resource: &str,
        params: UpdateManyParams,
    ) -> Result<UpdateManyResult, ApiError> {
        let response = self.send(self.build_update_many(resource, &params)?).await?;
        self.parse_update_many(&response)
    }

    async fn delete(&self, resource: &str, params: DeleteParams) -> Result<DeleteResult, ApiError> {
        let response = self.send(self.build_delete(resource, &params)).await?;
        self.parse_delete(&response, params)
    }

    async fn delete_many(
        &self,
        resource: &str,
        params: DeleteManyParams,
    ) -> Result<DeleteManyResult, ApiError> {
        let response = self.send(self.build_delete_many(resource, &params)?).await?;
        self.parse_delete_many(&response, params)
    }
}
