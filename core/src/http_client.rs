//! Transport decorator that authenticates data requests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::storage::{load_credentials, Storage};

/// Adds `Accept: application/json` and, when a session is stored, the bearer
/// token to every request before handing it to the inner transport.
#[derive(Clone)]
pub struct DirectusHttpClient {
    inner: Arc<dyn HttpTransport>,
    storage: Arc<dyn Storage>,
}

impl DirectusHttpClient {
    pub fn new(inner: Arc<dyn HttpTransport>, storage: Arc<dyn Storage>) -> Self {
        Self { inner, storage }
    }
}

#[async_trait]
impl HttpTransport for DirectusHttpClient {
    async fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse, ApiError> {
        request.set_header("accept", "application/json");
        if let Some(access_token) = load_credentials(self.storage.as_ref()).and_then(|c| c.access_token) {
            request.set_header("authorization", format!("Bearer {access_token}"));
        }
        self.inner.execute(request).await
    }
}
