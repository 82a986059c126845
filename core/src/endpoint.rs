//! Resource name to endpoint mapping.

use crate::types::Identifier;

/// Prefix marking Directus system collections (`directus_users` → `/users`).
pub const SYSTEM_PREFIX: &str = "directus_";

/// Collection endpoint for `resource`.
pub fn resource_endpoint(api_base_url: &str, resource: &str) -> String {
    match resource.strip_prefix(SYSTEM_PREFIX) {
        Some(system) => format!("{api_base_url}/{system}"),
        None => format!("{api_base_url}/items/{resource}"),
    }
}

/// Single-record endpoint for `resource` and `id`.
pub fn record_endpoint(api_base_url: &str, resource: &str, id: &Identifier) -> String {
    let id = id.to_string();
    format!(
        "{}/{}",
        resource_endpoint(api_base_url, resource),
        urlencoding::encode(&id)
    )
}
