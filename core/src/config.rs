//! Configuration and the assembled provider bundle.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::auth_provider::{DirectusAuthProvider, FullNameFormatter};
use crate::data_provider::DirectusDataProvider;
use crate::http::HttpTransport;
use crate::http_client::DirectusHttpClient;
use crate::refresh::RefreshAuthToken;
use crate::refreshing::{RefreshingAuthProvider, RefreshingDataProvider};
use crate::storage::{MemoryStorage, Storage};

/// Environment variable read by [`DirectusConfig::from_env`].
pub const DIRECTUS_URL_VAR: &str = "DIRECTUS_URL";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("api base url is empty")]
    EmptyUrl,
}

/// Where the Directus API lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirectusConfig {
    pub api_base_url: String,
}

impl DirectusConfig {
    /// A trailing `/` is dropped so endpoints can be joined with `/`.
    pub fn new(api_base_url: &str) -> Result<Self, ConfigError> {
        let api_base_url = api_base_url.trim().trim_end_matches('/');
        if api_base_url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        Ok(Self {
            api_base_url: api_base_url.to_string(),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var(DIRECTUS_URL_VAR).map_err(|_| ConfigError::MissingVar(DIRECTUS_URL_VAR))?;
        Self::new(&url)
    }
}

/// Optional collaborators for [`get_directus_providers`].
#[derive(Default, Clone)]
pub struct DirectusOptions {
    /// Session storage; an in-memory store when absent.
    pub storage: Option<Arc<dyn Storage>>,
    /// Display-name formatter for `get_identity`.
    pub full_name: Option<FullNameFormatter>,
}

impl fmt::Debug for DirectusOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectusOptions")
            .field("storage", &self.storage.is_some())
            .field("full_name", &self.full_name.is_some())
            .finish()
    }
}

/// Providers wired to one storage and one shared refresh slot.
pub struct DirectusProviders {
    pub auth_provider: RefreshingAuthProvider<DirectusAuthProvider>,
    pub data_provider: RefreshingDataProvider<DirectusDataProvider>,
    pub http_client: DirectusHttpClient,
    pub refresh_auth_token: RefreshAuthToken,
    pub storage: Arc<dyn Storage>,
}

/// Build auth and data providers that refresh the session automatically.
///
/// `transport` performs the raw round-trips. Data requests go through a
/// [`DirectusHttpClient`] that attaches the stored bearer token; auth
/// requests set their own headers.
pub fn get_directus_providers(
    config: &DirectusConfig,
    transport: Arc<dyn HttpTransport>,
    options: DirectusOptions,
) -> DirectusProviders {
    let storage = options
        .storage
        .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as Arc<dyn Storage>);
    let refresh = RefreshAuthToken::new(&config.api_base_url, Arc::clone(&transport), Arc::clone(&storage));

    let mut auth = DirectusAuthProvider::new(&config.api_base_url, Arc::clone(&transport), Arc::clone(&storage))
        .with_refresh(refresh.clone());
    if let Some(full_name) = options.full_name {
        auth = auth.with_full_name(full_name);
    }

    let http_client = DirectusHttpClient::new(transport, Arc::clone(&storage));
    let data = DirectusDataProvider::new(&config.api_base_url, Arc::new(http_client.clone()));

    DirectusProviders {
        auth_provider: RefreshingAuthProvider::new(auth, refresh.clone()),
        data_provider: RefreshingDataProvider::new(data, refresh.clone()),
        http_client,
        refresh_auth_token: refresh,
        storage,
    }
}
