//! The capabilities the engine needs from the remote service.
//!
//! Transport and authentication live behind [`RemoteClient`]. The engine receives an
//! implementation at construction and never reaches for ambient client state.
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{RemoteRule, ServiceVersion};

pub mod memory;

/// Access to the request settings of a versioned remote service.
///
/// Every rule operation is scoped to a `(service_id, version)` coordinate. Implementations report
/// their own error type, which the engine surfaces verbatim as the source of its errors.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the version the service currently points at. This is the active version, or the
    /// latest draft for a service which was never activated.
    async fn active_version(&self, service_id: &str) -> Result<ServiceVersion, Self::Error>;

    /// Clones `version` including all of its rules and returns the number of the new draft.
    async fn clone_version(&self, service_id: &str, version: u32) -> Result<u32, Self::Error>;

    /// Lists all request settings of a version.
    async fn list(&self, service_id: &str, version: u32) -> Result<Vec<RemoteRule>, Self::Error>;

    /// Creates a request setting in a draft version and returns the stored record.
    async fn create(
        &self,
        service_id: &str,
        version: u32,
        rule: RemoteRule,
    ) -> Result<RemoteRule, Self::Error>;

    /// Deletes the request setting called `name` from a draft version.
    async fn delete(&self, service_id: &str, version: u32, name: &str) -> Result<(), Self::Error>;

    /// Promotes `version` to be the active version of the service.
    async fn activate_version(
        &self,
        service_id: &str,
        version: u32,
    ) -> Result<ServiceVersion, Self::Error>;
}

#[async_trait]
impl<C> RemoteClient for Arc<C>
where
    C: RemoteClient + ?Sized,
{
    type Error = C::Error;

    async fn active_version(&self, service_id: &str) -> Result<ServiceVersion, Self::Error> {
        (**self).active_version(service_id).await
    }

    async fn clone_version(&self, service_id: &str, version: u32) -> Result<u32, Self::Error> {
        (**self).clone_version(service_id, version).await
    }

    async fn list(&self, service_id: &str, version: u32) -> Result<Vec<RemoteRule>, Self::Error> {
        (**self).list(service_id, version).await
    }

    async fn create(
        &self,
        service_id: &str,
        version: u32,
        rule: RemoteRule,
    ) -> Result<RemoteRule, Self::Error> {
        (**self).create(service_id, version, rule).await
    }

    async fn delete(&self, service_id: &str, version: u32, name: &str) -> Result<(), Self::Error> {
        (**self).delete(service_id, version, name).await
    }

    async fn activate_version(
        &self,
        service_id: &str,
        version: u32,
    ) -> Result<ServiceVersion, Self::Error> {
        (**self).activate_version(service_id, version).await
    }
}
