//! The provider interfaces an admin UI drives.
//!
//! One method per framework operation. Implementations are plain values that
//! can be shared behind `Arc<dyn ...>`.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::{
    CreateParams, CreateResult, DeleteManyParams, DeleteManyResult, DeleteParams, DeleteResult,
    GetListParams, GetListResult, GetManyParams, GetManyReferenceParams, GetManyResult,
    GetOneParams, GetOneResult, Identity, UpdateManyParams, UpdateManyResult, UpdateParams,
    UpdateResult,
};

#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn get_list(&self, resource: &str, params: GetListParams) -> Result<GetListResult, ApiError>;

    async fn get_one(&self, resource: &str, params: GetOneParams) -> Result<GetOneResult, ApiError>;

    async fn get_many(&self, resource: &str, params: GetManyParams) -> Result<GetManyResult, ApiError>;

    async fn get_many_reference(
        &self,
        resource: &str,
        params: GetManyReferenceParams,
    ) -> Result<GetListResult, ApiError>;

    async fn create(&self, resource: &str, params: CreateParams) -> Result<CreateResult, ApiError>;

    async fn update(&self, resource: &str, params: UpdateParams) -> Result<UpdateResult, ApiError>;

    async fn update_many(
        &self,
        resource: &str,
        params: UpdateManyParams,
    ) -> Result<UpdateManyResult, ApiError>;

    async fn delete(&self, resource: &str, params: DeleteParams) -> Result<DeleteResult, ApiError>;

    async fn delete_many(
        &self,
        resource: &str,
        params: DeleteManyParams,
    ) -> Result<DeleteManyResult, ApiError>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<(), ApiError>;

    async fn logout(&self) -> Result<(), ApiError>;

    /// `Err` means the UI should send the user to the login screen.
    async fn check_auth(&self) -> Result<(), ApiError>;

    /// `Err` means the error ended the session; `Ok` means it did not.
    async fn check_error(&self, error: &ApiError) -> Result<(), ApiError>;

    async fn get_identity(&self) -> Result<Option<Identity>, ApiError>;

    async fn get_permissions(&self) -> Result<Option<String>, ApiError>;
}
