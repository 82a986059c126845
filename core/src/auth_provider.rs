//! Auth provider for the Directus REST API.
//!
//! # Design
//! The session lives entirely in the injected `Storage` under
//! `AUTH_STORAGE_KEY`; this type holds no token state of its own. Requests are
//! built by `build_*` methods and interpreted by `parse_*` methods, as in the
//! data provider, and the `AuthProvider` impl sequences them with storage
//! reads and writes.
//!
//! `check_error` rejects on 401/403 without attempting a refresh: refreshing
//! is the job of `check_auth` and of the refresh wrappers, which run before
//! requests rather than after failures.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::http::{http_error, parse_body, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::jwt::decode_claims;
use crate::provider::AuthProvider;
use crate::refresh::RefreshAuthToken;
use crate::storage::{clear_credentials, load_credentials, store_credentials, Credentials, Storage};
use crate::types::{DirectusUser, Identity};

/// Formats the display name shown for the signed-in user.
pub type FullNameFormatter = Arc<dyn Fn(&DirectusUser) -> String + Send + Sync>;

/// `"{last_name} {first_name}"`.
pub fn default_full_name(user: &DirectusUser) -> String {
    format!(
        "{} {}",
        user.last_name.as_deref().unwrap_or_default(),
        user.first_name.as_deref().unwrap_or_default()
    )
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct LogoutBody<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct Role {
    #[serde(default)]
    name: Option<String>,
}

/// `AuthProvider` backed by a Directus instance.
#[derive(Clone)]
pub struct DirectusAuthProvider {
    api_base_url: String,
    transport: Arc<dyn HttpTransport>,
    storage: Arc<dyn Storage>,
    refresh: RefreshAuthToken,
    full_name: FullNameFormatter,
}

impl fmt::Debug for DirectusAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectusAuthProvider")
            .field("api_base_url", &self.api_base_url)
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}

impl DirectusAuthProvider {
    pub fn new(api_base_url: &str, transport: Arc<dyn HttpTransport>, storage: Arc<dyn Storage>) -> Self {
        let api_base_url = api_base_url.trim_end_matches('/').to_string();
        let refresh = RefreshAuthToken::new(&api_base_url, Arc::clone(&transport), Arc::clone(&storage));
        Self {
            api_base_url,
            transport,
            storage,
            refresh,
            full_name: Arc::new(default_full_name),
        }
    }

    /// Share `refresh` (and its in-flight slot) with other components.
    pub fn with_refresh(mut self, refresh: RefreshAuthToken) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_full_name(mut self, full_name: FullNameFormatter) -> Self {
        self.full_name = full_name;
        self
    }

    pub fn refresh_auth_token(&self) -> &RefreshAuthToken {
        &self.refresh
    }

    /// Refresh the stored credentials if the access token has expired.
    ///
    /// # Errors
    ///
    /// See [`RefreshAuthToken::refresh`].
    pub async fn refresh_auth(&self) -> Result<(), ApiError> {
        self.refresh.refresh().await
    }

    pub fn build_login(&self, username: &str, password: &str) -> Result<HttpRequest, ApiError> {
        HttpRequest::json(
            HttpMethod::Post,
            format!("{}/auth/login", self.api_base_url),
            &LoginBody {
                email: username,
                password,
            },
        )
    }

    pub fn build_logout(&self, refresh_token: &str) -> Result<HttpRequest, ApiError> {
        HttpRequest::json(
            HttpMethod::Post,
            format!("{}/auth/logout", self.api_base_url),
            &LogoutBody { refresh_token },
        )
    }

    pub fn build_get_identity(&self, access_token: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/users/me", self.api_base_url)).with_header("authorization", bearer(access_token))
    }

    pub fn build_get_role(&self, role: &str, access_token: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/roles/{}", self.api_base_url, urlencoding::encode(role)))
            .with_header("authorization", bearer(access_token))
    }

    pub fn parse_login(&self, response: &HttpResponse) -> Result<Credentials, ApiError> {
        if !response.is_success() {
            return Err(ApiError::Authentication {
                status: response.status,
                status_text: response.status_text.clone(),
            });
        }
        let envelope: Envelope<Credentials> = parse_body(response)?;
        envelope.data.require_complete()
    }

    pub fn parse_logout(&self, response: &HttpResponse) -> Result<(), ApiError> {
        if response.is_success() {
            Ok(())
        } else {
            Err(http_error(response))
        }
    }

    pub fn parse_get_identity(&self, response: &HttpResponse) -> Result<Identity, ApiError> {
        if !response.is_success() {
            return Err(http_error(response));
        }
        let envelope: Envelope<DirectusUser> = parse_body(response)?;
        let user = envelope.data;
        Ok(Identity {
            full_name: (self.full_name)(&user),
            id: user.id,
            avatar: user.avatar,
        })
    }

    pub fn parse_get_role(&self, response: &HttpResponse) -> Result<Option<String>, ApiError> {
        if !response.is_success() {
            return Err(http_error(response));
        }
        let envelope: Envelope<Role> = parse_body(response)?;
        Ok(envelope.data.name)
    }

    fn credentials(&self) -> Option<Credentials> {
        load_credentials(self.storage.as_ref())
    }
}

fn bearer(access_token: &str) -> String {
    format!("Bearer {access_token}")
}

#[async_trait]
impl AuthProvider for DirectusAuthProvider {
    async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let response = self.transport.execute(self.build_login(username, password)?).await?;
        let credentials = self.parse_login(&response)?;
        store_credentials(self.storage.as_ref(), &credentials);
        tracing::debug!("login succeeded");
        Ok(())
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let Some(refresh_token) = self
            .credentials()
            .filter(Credentials::is_complete)
            .and_then(|credentials| credentials.refresh_token)
        else {
            return Ok(());
        };
        let response = self.transport.execute(self.build_logout(&refresh_token)?).await?;
        self.parse_logout(&response)?;
        clear_credentials(self.storage.as_ref());
        tracing::debug!("logged out");
        Ok(())
    }

    async fn check_auth(&self) -> Result<(), ApiError> {
        if self.credentials().is_none() {
            return Err(ApiError::Unauthenticated);
        }
        self.refresh_auth().await
    }

    async fn check_error(&self, error: &ApiError) -> Result<(), ApiError> {
        if error.is_auth_failure() {
            return Err(error.clone());
        }
        Ok(())
    }

    async fn get_identity(&self) -> Result<Option<Identity>, ApiError> {
        let Some(access_token) = self.credentials().and_then(|c| c.access_token) else {
            return Ok(None);
        };
        let response = self.transport.execute(self.build_get_identity(&access_token)).await?;
        self.parse_get_identity(&response).map(Some)
    }

    async fn get_permissions(&self) -> Result<Option<String>, ApiError> {
        let Some(access_token) = self.credentials().and_then(|c| c.access_token) else {
            return Ok(None);
        };
        let claims = decode_claims(&access_token).map_err(|e| {
            tracing::warn!(error = %e, "stored access token does not decode");
            ApiError::Unauthenticated
        })?;
        let Some(role) = claims.role else {
            return Ok(None);
        };
        let response = self.transport.execute(self.build_get_role(&role, &access_token)).await?;
        self.parse_get_role(&response)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::jwt::{encode_unsigned, now_secs};
    use crate::storage::{MemoryStorage, AUTH_STORAGE_KEY};
    use crate::testing::{response, ScriptedTransport};

    const BASE: &str = "http://localhost:8055";

    fn token(exp_in: f64, role: Option<&str>) -> String {
        encode_unsigned(&json!({"exp": now_secs() + exp_in, "role": role}))
    }

    fn seed(storage: &MemoryStorage, access_token: Option<String>, refresh_token: Option<&str>) {
        store_credentials(
            storage,
            &Credentials {
                access_token,
                refresh_token: refresh_token.map(str::to_string),
            },
        );
    }

    fn provider(transport: &Arc<ScriptedTransport>, storage: &Arc<MemoryStorage>) -> DirectusAuthProvider {
        DirectusAuthProvider::new(BASE, transport.clone(), storage.clone())
    }

    #[test]
    fn default_full_name_is_last_then_first() {
        let user = DirectusUser {
            id: json!(1),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            avatar: None,
        };
        assert_eq!(default_full_name(&user), "Lovelace Ada");
    }

    #[test]
    fn build_login_sends_email_and_password() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        let req = provider(&transport, &storage).build_login("a@b.c", "pw").unwrap();
        assert_eq!(req.url, "http://localhost:8055/auth/login");
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"email": "a@b.c", "password": "pw"}));
    }

    #[tokio::test]
    async fn login_stores_credentials() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        transport.push(response(200, r#"{"data":{"access_token":"a1","refresh_token":"r1","expires":900000}}"#));

        provider(&transport, &storage).login("a@b.c", "pw").await.unwrap();
        let stored = load_credentials(storage.as_ref()).unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("a1"));
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn failed_login_leaves_storage_untouched() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item(AUTH_STORAGE_KEY, "previous");
        transport.push(response(401, ""));

        let err = provider(&transport, &storage).login("a@b.c", "bad").await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Authentication {
                status: 401,
                status_text: "Unauthorized".to_string()
            }
        );
        assert_eq!(storage.get_item(AUTH_STORAGE_KEY).as_deref(), Some("previous"));
    }

    #[tokio::test]
    async fn login_without_refresh_token_is_rejected() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        transport.push(response(200, r#"{"data":{"access_token":"a1"}}"#));

        let err = provider(&transport, &storage).login("a@b.c", "pw").await.unwrap_err();
        assert!(matches!(err, ApiError::Deserialization(_)));
        assert_eq!(storage.get_item(AUTH_STORAGE_KEY), None);
    }

    #[tokio::test]
    async fn logout_without_record_is_noop() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        provider(&transport, &storage).logout().await.unwrap();
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn logout_with_incomplete_record_is_noop() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, None, Some("r1"));
        provider(&transport, &storage).logout().await.unwrap();
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn logout_revokes_then_clears() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some("a1".to_string()), Some("r1"));
        transport.push(response(204, ""));

        provider(&transport, &storage).logout().await.unwrap();
        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "http://localhost:8055/auth/logout");
        assert_eq!(sent.body.as_deref(), Some(r#"{"refresh_token":"r1"}"#));
        assert_eq!(storage.get_item(AUTH_STORAGE_KEY), None);
    }

    #[tokio::test]
    async fn failed_logout_keeps_record() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some("a1".to_string()), Some("r1"));
        transport.push(response(500, ""));

        let err = provider(&transport, &storage).logout().await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(load_credentials(storage.as_ref()).is_some());
    }

    #[tokio::test]
    async fn check_auth_without_record_is_unauthorized() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        let err = provider(&transport, &storage).check_auth().await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn check_auth_with_fresh_token_makes_no_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some(token(600.0, None)), Some("r1"));
        provider(&transport, &storage).check_auth().await.unwrap();
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn check_auth_refreshes_expired_token() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some(token(-1.0, None)), Some("r1"));
        transport.push(response(
            200,
            &json!({"data": {"access_token": token(600.0, None), "refresh_token": "r2"}}).to_string(),
        ));

        provider(&transport, &storage).check_auth().await.unwrap();
        assert_eq!(transport.count_to("/auth/refresh"), 1);
    }

    #[tokio::test]
    async fn check_error_rejects_only_auth_statuses() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        let provider = provider(&transport, &storage);
        let http = |status| ApiError::Http {
            status,
            status_text: String::new(),
            body: String::new(),
        };
        assert!(provider.check_error(&http(401)).await.is_err());
        assert!(provider.check_error(&http(403)).await.is_err());
        assert!(provider.check_error(&http(404)).await.is_ok());
        assert!(provider.check_error(&http(500)).await.is_ok());
        assert!(provider.check_error(&ApiError::NotFound).await.is_ok());
        assert!(provider.check_error(&ApiError::Unauthenticated).await.is_err());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn get_identity_without_session_is_none() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        assert_eq!(provider(&transport, &storage).get_identity().await.unwrap(), None);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn get_identity_projects_current_user() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some("a1".to_string()), Some("r1"));
        transport.push(response(
            200,
            r#"{"data":{"id":"u1","first_name":"Ada","last_name":"Lovelace","avatar":"f1","email":"x"}}"#,
        ));

        let identity = provider(&transport, &storage).get_identity().await.unwrap().unwrap();
        assert_eq!(
            identity,
            Identity {
                id: json!("u1"),
                full_name: "Lovelace Ada".to_string(),
                avatar: Some("f1".to_string()),
            }
        );
        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "http://localhost:8055/users/me");
        assert_eq!(sent.header("Authorization"), Some("Bearer a1"));
    }

    #[tokio::test]
    async fn get_identity_uses_custom_full_name() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some("a1".to_string()), Some("r1"));
        transport.push(response(200, r#"{"data":{"id":1,"first_name":"Ada","last_name":"Lovelace"}}"#));

        let provider = provider(&transport, &storage).with_full_name(Arc::new(|user: &DirectusUser| {
            format!("{} {}", user.first_name.as_deref().unwrap_or_default(), user.last_name.as_deref().unwrap_or_default())
        }));
        let identity = provider.get_identity().await.unwrap().unwrap();
        assert_eq!(identity.full_name, "Ada Lovelace");
        assert_eq!(identity.avatar, None);
    }

    #[tokio::test]
    async fn get_identity_failure_carries_status() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some("a1".to_string()), Some("r1"));
        transport.push(response(401, ""));

        let err = provider(&transport, &storage).get_identity().await.unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn get_permissions_without_access_token_makes_no_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, None, Some("r1"));
        assert_eq!(provider(&transport, &storage).get_permissions().await.unwrap(), None);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn get_permissions_fetches_role_name() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some(token(600.0, Some("role-1"))), Some("r1"));
        transport.push(response(200, r#"{"data":{"id":"role-1","name":"Administrator"}}"#));

        let permissions = provider(&transport, &storage).get_permissions().await.unwrap();
        assert_eq!(permissions.as_deref(), Some("Administrator"));
        assert_eq!(transport.requests()[0].url, "http://localhost:8055/roles/role-1");
    }

    #[tokio::test]
    async fn get_permissions_with_undecodable_token_is_unauthenticated() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some("garbage".to_string()), Some("r1"));
        let err = provider(&transport, &storage).get_permissions().await.unwrap_err();
        assert_eq!(err, ApiError::Unauthenticated);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn get_permissions_without_role_claim_is_none() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some(token(600.0, None)), Some("r1"));
        assert_eq!(provider(&transport, &storage).get_permissions().await.unwrap(), None);
        assert_eq!(transport.request_count(), 0);
    }
}
