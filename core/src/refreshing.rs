//! Provider decorators that refresh the session before delegating.
//!
//! A failed refresh fails the wrapped call without reaching the inner
//! provider.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::provider::{AuthProvider, DataProvider};
use crate::refresh::RefreshAuthToken;
use crate::types::{
    CreateParams, CreateResult, DeleteManyParams, DeleteManyResult, DeleteParams, DeleteResult,
    GetListParams, GetListResult, GetManyParams, GetManyReferenceParams, GetManyResult,
    GetOneParams, GetOneResult, Identity, UpdateManyParams, UpdateManyResult, UpdateParams,
    UpdateResult,
};

/// Runs `refresh` before every data operation.
#[derive(Debug, Clone)]
pub struct RefreshingDataProvider<P> {
    inner: P,
    refresh: RefreshAuthToken,
}

impl<P> RefreshingDataProvider<P> {
    pub fn new(inner: P, refresh: RefreshAuthToken) -> Self {
        Self { inner, refresh }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: DataProvider> DataProvider for RefreshingDataProvider<P> {
    async fn get_list(&self, resource: &str, params: GetListParams) -> Result<GetListResult, ApiError> {
        self.refresh.refresh().await?;
        self.inner.get_list(resource, params).await
    }

    async fn get_one(&self, resource: &str, params: GetOneParams) -> Result<GetOneResult, ApiError> {
        self.refresh.refresh().await?;
        self.inner.get_one(resource, params).await
    }

    async fn get_many(&self, resource: &str, params: GetManyParams) -> Result<GetManyResult, ApiError> {
        self.refresh.refresh().await?;
        self.inner.get_many(resource, params).await
    }

    async fn get_many_reference(
        &self,
        resource: &str,
        params: GetManyReferenceParams,
    ) -> Result<GetListResult, ApiError> {
        self.refresh.refresh().await?;
        self.inner.get_many_reference(resource, params).await
    }

    async fn create(&self, resource: &str, params: CreateParams) -> Result<CreateResult, ApiError> {
        self.refresh.refresh().await?;
        self.inner.create(resource, params).await
    }

    async fn update(&self, resource: &str, params: UpdateParams) -> Result<UpdateResult, ApiError> {
        self.refresh.refresh().await?;
        self.inner.update(resource, params).await
    }

    async fn update_many(
        &self,
        resource: &str,
        params: UpdateManyParams,
    ) -> Result<UpdateManyResult, ApiError> {
        self.refresh.refresh().await?;
        self.inner.update_many(resource, params).await
    }

    async fn delete(&self, resource: &str, params: DeleteParams) -> Result<DeleteResult, ApiError> {
        self.refresh.refresh().await?;
        self.inner.delete(resource, params).await
    }

    async fn delete_many(
        &self,
        resource: &str,
        params: DeleteManyParams,
    ) -> Result<DeleteManyResult, ApiError> {
        self.refresh.refresh().await?;
        self.inner.delete_many(resource, params).await
    }
}

/// Runs `refresh` before `check_auth`, `get_identity` and `get_permissions`.
///
/// `login`, `logout` and `check_error` pass straight through.
#[derive(Debug, Clone)]
pub struct RefreshingAuthProvider<P> {
    inner: P,
    refresh: RefreshAuthToken,
}

impl<P> RefreshingAuthProvider<P> {
    pub fn new(inner: P, refresh: RefreshAuthToken) -> Self {
        Self { inner, refresh }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: AuthProvider> AuthProvider for RefreshingAuthProvider<P> {
    async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        self.inner.login(username, password).await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.inner.logout().await
    }

    async fn check_auth(&self) -> Result<(), ApiError> {
        self.refresh.refresh().await?;
        self.inner.check_auth().await
    }

    async fn check_error(&self, error: &ApiError) -> Result<(), ApiError> {
        self.inner.check_error(error).await
    }

    async fn get_identity(&self) -> Result<Option<Identity>, ApiError> {
        self.refresh.refresh().await?;
        self.inner.get_identity().await
    }

    async fn get_permissions(&self) -> Result<Option<String>, ApiError> {
        self.refresh.refresh().await?;
        self.inner.get_permissions().await
    }
}
