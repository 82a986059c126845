//! Key-value storage seam and the persisted credential record.
//!
//! The providers never hold tokens themselves: the record is read from the
//! injected `Storage` on every use and written back wholesale.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Storage key under which the serialized `Credentials` live.
pub const AUTH_STORAGE_KEY: &str = "auth";

/// String key-value store holding the session.
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str);
    fn remove_item(&self, key: &str);
}

/// Process-local `Storage`, the default when the host supplies none.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        self.items.lock().insert(key.to_string(), value.to_string());
    }

    fn remove_item(&self, key: &str) {
        self.items.lock().remove(key);
    }
}

/// The access/refresh token pair returned by login and refresh.
///
/// Both fields are optional on read: a record written by something else may
/// lack either one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }

    /// Accept a pair issued by the backend only when it carries both tokens.
    pub fn require_complete(self) -> Result<Self, ApiError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(ApiError::Deserialization("token response lacks an access or refresh token".to_string()))
        }
    }
}

/// Read the stored record. A malformed value reads as "no session".
pub fn load_credentials(storage: &dyn Storage) -> Option<Credentials> {
    let raw = storage.get_item(AUTH_STORAGE_KEY)?;
    match serde_json::from_str::<Option<Credentials>>(&raw) {
        Ok(credentials) => credentials,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed stored credentials");
            None
        }
    }
}

pub fn store_credentials(storage: &dyn Storage, credentials: &Credentials) {
    // Serializing two optional strings cannot fail.
    if let Ok(raw) = serde_json::to_string(credentials) {
        storage.set_item(AUTH_STORAGE_KEY, &raw);
    }
}

pub fn clear_credentials(storage: &dyn Storage) {
    storage.remove_item(AUTH_STORAGE_KEY);
}
