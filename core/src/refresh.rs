//! Access-token refresh with a single in-flight request.
//!
//! # Design
//! The slot holds either nothing or the one pending refresh as a `Shared`
//! future. Check-and-set happens under a mutex that is never held across an
//! `.await`, so concurrent callers on any runtime either start the refresh or
//! clone the pending one. The refresh clears the slot itself as its final
//! step, success or failure. A caller that drops its future does not cancel
//! the refresh: the next caller picks up the same shared future and drives it.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::http::{http_error, parse_body, HttpMethod, HttpRequest, HttpTransport};
use crate::jwt::{is_expired, now_secs};
use crate::storage::{load_credentials, store_credentials, Credentials, Storage};

type PendingRefresh = Shared<BoxFuture<'static, Result<(), ApiError>>>;

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: Option<&'a str>,
    mode: &'static str,
}

#[derive(Deserialize)]
struct CredentialsEnvelope {
    data: Credentials,
}

struct RefreshState {
    api_base_url: String,
    transport: Arc<dyn HttpTransport>,
    storage: Arc<dyn Storage>,
    in_flight: Mutex<Option<PendingRefresh>>,
}

/// Refreshes the stored credentials when the access token has expired.
///
/// Clones share the same in-flight slot.
#[derive(Clone)]
pub struct RefreshAuthToken {
    state: Arc<RefreshState>,
}

impl std::fmt::Debug for RefreshAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshAuthToken")
            .field("api_base_url", &self.state.api_base_url)
            .field("in_flight", &self.is_refreshing())
            .finish()
    }
}

impl RefreshAuthToken {
    pub fn new(api_base_url: &str, transport: Arc<dyn HttpTransport>, storage: Arc<dyn Storage>) -> Self {
        Self {
            state: Arc::new(RefreshState {
                api_base_url: api_base_url.trim_end_matches('/').to_string(),
                transport,
                storage,
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.in_flight.lock().is_some()
    }

    /// Number of live handles on the pending refresh, the slot's own included.
    #[cfg(test)]
    fn pending_handles(&self) -> usize {
        self.state
            .in_flight
            .lock()
            .as_ref()
            .and_then(Shared::strong_count)
            .unwrap_or(0)
    }

    /// Refresh the credentials if the access token has expired.
    ///
    /// Resolves immediately when the token is still valid. While a refresh is
    /// pending, every caller awaits that same request and gets its outcome.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` when no usable record is stored; `Http` carrying the
    /// backend status when the refresh is rejected; transport errors as-is.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let pending = {
            let mut slot = self.state.in_flight.lock();
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => match self.start()? {
                    Some(pending) => {
                        *slot = Some(pending.clone());
                        pending
                    }
                    None => return Ok(()),
                },
            }
        };
        pending.await
    }

    /// Decide whether a refresh is needed and, if so, build it.
    fn start(&self) -> Result<Option<PendingRefresh>, ApiError> {
        let credentials = load_credentials(self.state.storage.as_ref()).ok_or(ApiError::Unauthenticated)?;
        if credentials.access_token.is_none() && credentials.refresh_token.is_none() {
            return Err(ApiError::Unauthenticated);
        }
        let expired = credentials
            .access_token
            .as_deref()
            .map_or(true, |token| is_expired(token, now_secs()));
        if !expired {
            return Ok(None);
        }

        tracing::debug!("access token expired, refreshing");
        let state = Arc::clone(&self.state);
        let refresh_token = credentials.refresh_token;
        let pending = async move {
            let outcome = request_refresh(&state, refresh_token.as_deref()).await;
            state.in_flight.lock().take();
            outcome
        }
        .boxed()
        .shared();
        Ok(Some(pending))
    }
}

async fn request_refresh(state: &RefreshState, refresh_token: Option<&str>) -> Result<(), ApiError> {
    let request = HttpRequest::json(
        HttpMethod::Post,
        format!("{}/auth/refresh", state.api_base_url),
        &RefreshBody {
            refresh_token,
            mode: "json",
        },
    )?;
    let response = state.transport.execute(request).await?;
    if !response.is_success() {
        tracing::warn!(status = response.status, "token refresh rejected");
        return Err(http_error(&response));
    }
    let envelope: CredentialsEnvelope = parse_body(&response)?;
    let credentials = envelope.data.require_complete()?;
    store_credentials(state.storage.as_ref(), &credentials);
    tracing::debug!("token refreshed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::jwt::encode_unsigned;
    use crate::storage::MemoryStorage;
    use crate::testing::{response, ScriptedTransport};

    const BASE: &str = "http://localhost:8055";

    fn token_expiring_in(secs: f64) -> String {
        encode_unsigned(&json!({"exp": now_secs() + secs, "role": "r1"}))
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

    fn refresh_response(access_token: &str) -> crate::http::HttpResponse {
        response(
            200,
            &json!({"data": {"access_token": access_token, "refresh_token": "r2"}}).to_string(),
        )
    }

    fn refresher(transport: &Arc<ScriptedTransport>, storage: &Arc<MemoryStorage>) -> RefreshAuthToken {
        RefreshAuthToken::new(BASE, transport.clone(), storage.clone())
    }

    #[tokio::test]
    async fn valid_token_needs_no_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some(token_expiring_in(3600.0)), Some("r1"));

        refresher(&transport, &storage).refresh().await.unwrap();
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn expired_token_is_replaced() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some(token_expiring_in(-10.0)), Some("r1"));
        let fresh = token_expiring_in(900.0);
        transport.push(refresh_response(&fresh));

        let refresher = refresher(&transport, &storage);
        refresher.refresh().await.unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "http://localhost:8055/auth/refresh");
        let body: serde_json::Value = serde_json::from_str(sent.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"refresh_token": "r1", "mode": "json"}));

        let stored = load_credentials(storage.as_ref()).unwrap();
        assert_eq!(stored.access_token, Some(fresh));
        assert_eq!(stored.refresh_token.as_deref(), Some("r2"));
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test]
    async fn partial_refresh_response_keeps_previous_record() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        let expired = token_expiring_in(-10.0);
        seed(&storage, Some(expired.clone()), Some("r1"));
        transport.push(response(
            200,
            &json!({"data": {"access_token": token_expiring_in(900.0)}}).to_string(),
        ));

        let refresher = refresher(&transport, &storage);
        let err = refresher.refresh().await.unwrap_err();
        assert!(matches!(err, ApiError::Deserialization(_)));

        let stored = load_credentials(storage.as_ref()).unwrap();
        assert_eq!(stored.access_token, Some(expired));
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test]
    async fn undecodable_token_is_refreshed() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some("garbage".to_string()), Some("r1"));
        transport.push(refresh_response(&token_expiring_in(900.0)));

        refresher(&transport, &storage).refresh().await.unwrap();
        assert_eq!(transport.count_to("/auth/refresh"), 1);
    }

    #[tokio::test]
    async fn missing_access_token_is_refreshed() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, None, Some("r1"));
        transport.push(refresh_response(&token_expiring_in(900.0)));

        refresher(&transport, &storage).refresh().await.unwrap();
        assert_eq!(transport.count_to("/auth/refresh"), 1);
    }

    #[tokio::test]
    async fn no_record_is_unauthenticated() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());

        let err = refresher(&transport, &storage).refresh().await.unwrap_err();
        assert_eq!(err, ApiError::Unauthenticated);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn empty_record_is_unauthenticated() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, None, None);

        let err = refresher(&transport, &storage).refresh().await.unwrap_err();
        assert_eq!(err, ApiError::Unauthenticated);
    }

    #[tokio::test]
    async fn rejected_refresh_carries_status_and_clears_slot() {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some(token_expiring_in(-10.0)), Some("stale"));
        transport.push(response(401, r#"{"errors":[]}"#));
        transport.push(refresh_response(&token_expiring_in(900.0)));

        let refresher = refresher(&transport, &storage);
        let err = refresher.refresh().await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(!refresher.is_refreshing());

        // The slot is free again, so the next call issues a new request.
        refresher.refresh().await.unwrap();
        assert_eq!(transport.count_to("/auth/refresh"), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_request() {
        let transport = Arc::new(ScriptedTransport::gated());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some(token_expiring_in(-10.0)), Some("r1"));
        transport.push(refresh_response(&token_expiring_in(900.0)));

        let refresher = refresher(&transport, &storage);
        let mut callers = Vec::new();
        for _ in 0..8 {
            let refresher = refresher.clone();
            callers.push(tokio::spawn(async move { refresher.refresh().await }));
        }
        // Every caller holds a handle on the one pending refresh.
        while refresher.pending_handles() < 9 {
            tokio::task::yield_now().await;
        }
        transport.open_gate();

        for caller in callers {
            caller.await.unwrap().unwrap();
        }
        assert_eq!(transport.count_to("/auth/refresh"), 1);
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_failure() {
        let transport = Arc::new(ScriptedTransport::gated());
        let storage = Arc::new(MemoryStorage::new());
        seed(&storage, Some(token_expiring_in(-10.0)), Some("r1"));
        transport.push(response(403, ""));

        let refresher = refresher(&transport, &storage);
        let callers: Vec<_> = (0..4)
            .map(|_| {
                let refresher = refresher.clone();
                tokio::spawn(async move { refresher.refresh().await })
            })
            .collect();
        while refresher.pending_handles() < 5 {
            tokio::task::yield_now().await;
        }
        transport.open_gate();

        for caller in callers {
            assert_eq!(caller.await.unwrap().unwrap_err().status(), Some(403));
        }
        assert_eq!(transport.count_to("/auth/refresh"), 1);
    }
}
