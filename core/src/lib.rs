//! Directus data and auth providers for admin UIs.
//!
//! # Overview
//! Translates admin-UI provider calls (list, get, create, update, delete,
//! login, logout, session checks) into Directus REST requests, and Directus
//! responses back into the shapes the UI expects.
//!
//! # Design
//! - Providers are plain values implementing `DataProvider` / `AuthProvider`.
//! - HTTP and storage are injected (`HttpTransport`, `Storage`); this crate
//!   never opens a socket or touches global state.
//! - Each operation is split into `build_*` (produces a request) and
//!   `parse_*` (consumes a response), so the wire mapping is testable without
//!   a transport.
//! - Token refresh goes through one `RefreshAuthToken` whose in-flight request
//!   is shared by all concurrent callers.

pub mod auth_provider;
pub mod config;
pub mod data_provider;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod http;
pub mod http_client;
pub mod jwt;
pub mod provider;
pub mod refresh;
pub mod refreshing;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testing;

pub use auth_provider::{default_full_name, DirectusAuthProvider, FullNameFormatter};
pub use config::{get_directus_providers, ConfigError, DirectusConfig, DirectusOptions, DirectusProviders};
pub use data_provider::DirectusDataProvider;
pub use error::ApiError;
pub use filter::{FilterExpression, ListQuery};
pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
pub use http_client::DirectusHttpClient;
pub use provider::{AuthProvider, DataProvider};
pub use refresh::RefreshAuthToken;
pub use refreshing::{RefreshingAuthProvider, RefreshingDataProvider};
pub use storage::{Credentials, MemoryStorage, Storage, AUTH_STORAGE_KEY};
pub use types::*;
