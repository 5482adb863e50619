pub mod handlers;
pub mod models;
pub mod providers;
pub mod routes;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use models::RegistryToken;

/// Outcome of a read operation against the cloud registry.
///
/// "Missing" is an expected condition (rendered as 404 with a `null` body),
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    Missing,
}

/// Outcome of a token request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    Issued(RegistryToken),
    /// The provider has no short-lived pull credentials (OCI Artifacts)
    Unsupported,
}

/// The six operations every registry provider implements.
///
/// Records are returned as provider-specific JSON documents; the cloud is the
/// system of record and nothing is cached locally. Expected absences are
/// reported through [`Lookup::Missing`], classified cloud failures through
/// `anyhow::Error` chains that the HTTP layer renders as 500s.
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    /// List every repository in the configured account or compartment scope
    async fn list_repositories(&self) -> Result<Vec<Value>>;

    /// Look up one repository by name
    async fn get_repository(&self, name: &str) -> Result<Lookup<Value>>;

    /// Look up one image by repository name and tag
    async fn get_image(&self, name: &str, tag: &str) -> Result<Lookup<Value>>;

    /// Create a repository, returning the existing record when it already
    /// exists (idempotent)
    async fn create_repository(&self, name: &str) -> Result<Value>;

    /// Delete a repository; deleting an absent repository succeeds
    async fn delete_repository(&self, name: &str) -> Result<()>;

    /// Fetch a short-lived pull credential bundle
    async fn get_token(&self) -> Result<TokenGrant>;
}
