//! Oracle OCI Artifacts provider.
//!
//! There is no official Rust SDK for OCI, so this module carries its own
//! signed REST client. The provider logic talks to it through the
//! [`ArtifactsApi`] trait so it can be tested against an in-memory fake.

mod client;
mod profile;
mod sign;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

pub use client::{OciError, OciRestClient};
pub use profile::OciProfile;
pub use sign::RequestSigner;

use crate::server::registry::{Lookup, RegistryProvider, TokenGrant};
use crate::settings::OciSettings;

/// Container repository record, passed through to the HTTP surface as-is.
///
/// Only the fields the provider logic needs are typed; everything else the
/// service returns is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRepositorySummary {
    pub id: String,
    pub display_name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Container image record, passed through to the HTTP surface as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerImageSummary {
    pub id: String,
    pub display_name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// The Artifacts operations the provider needs, with classified errors.
#[async_trait]
pub trait ArtifactsApi: Send + Sync {
    /// List repositories in the compartment, optionally filtered by exact
    /// display name
    async fn list_repositories(
        &self,
        display_name: Option<&str>,
    ) -> Result<Vec<ContainerRepositorySummary>, OciError>;

    /// List images in a repository matching the `name:tag` display name
    async fn list_images(
        &self,
        repository_name: &str,
        display_name: &str,
    ) -> Result<Vec<ContainerImageSummary>, OciError>;

    async fn create_repository(
        &self,
        display_name: &str,
    ) -> Result<ContainerRepositorySummary, OciError>;

    /// Delete a repository by OCID
    async fn delete_repository(&self, id: &str) -> Result<(), OciError>;
}

/// Oracle OCI Artifacts registry provider.
pub struct OciProvider {
    api: Arc<dyn ArtifactsApi>,
    namespace: String,
}

impl OciProvider {
    pub fn new(api: Arc<dyn ArtifactsApi>, namespace: String) -> Self {
        Self { api, namespace }
    }

    /// Load API-key credentials from the config file and resolve the tenancy
    /// namespace before serving any request.
    pub async fn connect(settings: &OciSettings) -> Result<Self> {
        let profile = OciProfile::load(&settings.config_file)?;
        let key_pem = std::fs::read_to_string(&profile.key_file).with_context(|| {
            format!("failed to read private key {}", profile.key_file.display())
        })?;
        let signer = RequestSigner::new(
            &profile.tenancy,
            &profile.user,
            &profile.fingerprint,
            &key_pem,
        )?;
        let compartment_id = settings
            .compartment_id
            .clone()
            .unwrap_or_else(|| profile.tenancy.clone());

        let client = OciRestClient::new(signer, profile.region.clone(), compartment_id);
        let namespace = client
            .namespace()
            .await
            .context("failed to fetch tenancy namespace")?;
        info!(namespace, region = profile.region, "Connected to OCI Artifacts");

        Ok(Self::new(Arc::new(client), namespace))
    }

    /// Strip the registry namespace prefix from `namespace/repository`.
    ///
    /// The prefix is part of the image reference (`NAMESPACE/REPO:TAG`) but
    /// not of the repository's display name, and it must match the tenancy
    /// namespace.
    fn strip_namespace<'a>(&self, name: &'a str) -> Result<&'a str> {
        let Some((namespace, repository)) = name.split_once('/') else {
            bail!("invalid namespace/repository: {name}");
        };
        if namespace != self.namespace {
            bail!(
                "namespace does not match tenancy namespace {}: {namespace}",
                self.namespace
            );
        }
        Ok(repository)
    }

    async fn find_by_name(&self, name: &str) -> Result<Lookup<ContainerRepositorySummary>> {
        let repos = self
            .api
            .list_repositories(Some(name))
            .await
            .map_err(|err| {
                anyhow::Error::from(err).context(format!("failed to look up repository '{name}'"))
            })?;
        Ok(repos
            .into_iter()
            .find(|repo| repo.display_name == name)
            .map(Lookup::Found)
            .unwrap_or(Lookup::Missing))
    }
}

#[async_trait]
impl RegistryProvider for OciProvider {
    async fn list_repositories(&self) -> Result<Vec<Value>> {
        let repos = self
            .api
            .list_repositories(None)
            .await
            .map_err(|err| anyhow::Error::from(err).context("failed to list repositories"))?;
        repos
            .iter()
            .map(|repo| serde_json::to_value(repo).map_err(Into::into))
            .collect()
    }

    async fn get_repository(&self, name: &str) -> Result<Lookup<Value>> {
        let name = self.strip_namespace(name)?;
        match self.find_by_name(name).await? {
            Lookup::Found(repo) => Ok(Lookup::Found(serde_json::to_value(repo)?)),
            Lookup::Missing => Ok(Lookup::Missing),
        }
    }

    async fn get_image(&self, name: &str, tag: &str) -> Result<Lookup<Value>> {
        let repository = self.strip_namespace(name)?;
        // Image display names are `repository:tag`
        let display_name = format!("{repository}:{tag}");
        let images = self
            .api
            .list_images(repository, &display_name)
            .await
            .map_err(|err| {
                anyhow::Error::from(err)
                    .context(format!("failed to look up image '{display_name}'"))
            })?;
        match images.into_iter().next() {
            Some(image) => Ok(Lookup::Found(serde_json::to_value(image)?)),
            None => {
                debug!(repository, tag, "Image not found");
                Ok(Lookup::Missing)
            }
        }
    }

    async fn create_repository(&self, name: &str) -> Result<Value> {
        let name = self.strip_namespace(name)?;
        match self.api.create_repository(name).await {
            Ok(repo) => Ok(serde_json::to_value(repo)?),
            Err(OciError::NamespaceConflict) => {
                debug!(repository = name, "Repository already exists");
                match self.find_by_name(name).await? {
                    Lookup::Found(repo) => Ok(serde_json::to_value(repo)?),
                    Lookup::Missing => {
                        bail!("repository '{name}' reported as existing but cannot be found")
                    }
                }
            }
            Err(err) => Err(anyhow::Error::from(err)
                .context(format!("failed to create repository '{name}'"))),
        }
    }

    async fn delete_repository(&self, name: &str) -> Result<()> {
        let name = self.strip_namespace(name)?;
        match self.find_by_name(name).await? {
            Lookup::Found(repo) => {
                debug!(repository = name, id = repo.id, "Deleting repository");
                self.api.delete_repository(&repo.id).await.map_err(|err| {
                    anyhow::Error::from(err)
                        .context(format!("failed to delete repository '{name}'"))
                })
            }
            Lookup::Missing => {
                debug!(repository = name, "Repository already absent");
                Ok(())
            }
        }
    }

    /// OCI auth tokens are managed user credentials, not something this
    /// service can mint on demand.
    async fn get_token(&self) -> Result<TokenGrant> {
        Ok(TokenGrant::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn repo(id: &str, name: &str) -> ContainerRepositorySummary {
        ContainerRepositorySummary {
            id: id.to_string(),
            display_name: name.to_string(),
            extra: serde_json::Map::new(),
        }
    }

    #[derive(Default)]
    struct MockArtifacts {
        repos: Mutex<BTreeMap<String, ContainerRepositorySummary>>,
        images: BTreeMap<(String, String), ContainerImageSummary>,
        /// Force `create_repository` to report a conflict
        create_conflicts: bool,
    }

    impl MockArtifacts {
        fn with_repo(self, id: &str, name: &str) -> Self {
            self.repos
                .lock()
                .unwrap()
                .insert(name.to_string(), repo(id, name));
            self
        }

        fn with_image(mut self, repository: &str, display_name: &str) -> Self {
            self.images.insert(
                (repository.to_string(), display_name.to_string()),
                ContainerImageSummary {
                    id: format!("ocid1.containerimage.oc1..{display_name}"),
                    display_name: display_name.to_string(),
                    extra: serde_json::Map::new(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl ArtifactsApi for MockArtifacts {
        async fn list_repositories(
            &self,
            display_name: Option<&str>,
        ) -> Result<Vec<ContainerRepositorySummary>, OciError> {
            let repos = self.repos.lock().unwrap();
            Ok(match display_name {
                Some(name) => repos.get(name).cloned().into_iter().collect(),
                None => repos.values().cloned().collect(),
            })
        }

        async fn list_images(
            &self,
            repository_name: &str,
            display_name: &str,
        ) -> Result<Vec<ContainerImageSummary>, OciError> {
            Ok(self
                .images
                .get(&(repository_name.to_string(), display_name.to_string()))
                .cloned()
                .into_iter()
                .collect())
        }

        async fn create_repository(
            &self,
            display_name: &str,
        ) -> Result<ContainerRepositorySummary, OciError> {
            let mut repos = self.repos.lock().unwrap();
            if self.create_conflicts || repos.contains_key(display_name) {
                return Err(OciError::NamespaceConflict);
            }
            let record = repo(
                &format!("ocid1.containerrepo.oc1..{display_name}"),
                display_name,
            );
            repos.insert(display_name.to_string(), record.clone());
            Ok(record)
        }

        async fn delete_repository(&self, id: &str) -> Result<(), OciError> {
            let mut repos = self.repos.lock().unwrap();
            match repos.iter().find(|(_, repo)| repo.id == id) {
                Some((name, _)) => {
                    let name = name.clone();
                    repos.remove(&name);
                    Ok(())
                }
                None => Err(OciError::Service {
                    status: 404,
                    code: "NotAuthorizedOrNotFound".to_string(),
                    message: "repository not found".to_string(),
                }),
            }
        }
    }

    fn provider(api: MockArtifacts) -> OciProvider {
        OciProvider::new(Arc::new(api), "mytenancy".to_string())
    }

    #[tokio::test]
    async fn names_must_carry_the_tenancy_namespace() {
        let provider = provider(MockArtifacts::default());

        let err = provider.get_repository("bare-name").await.unwrap_err();
        assert!(err.to_string().contains("invalid namespace/repository"));

        let err = provider
            .get_repository("othertenancy/repo")
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("namespace does not match tenancy namespace mytenancy"));
    }

    #[tokio::test]
    async fn get_repository_strips_the_namespace() {
        let provider = provider(MockArtifacts::default().with_repo("ocid-1", "my-repo"));

        let record = provider.get_repository("mytenancy/my-repo").await.unwrap();
        assert_eq!(
            record,
            Lookup::Found(serde_json::json!({
                "id": "ocid-1",
                "displayName": "my-repo",
            }))
        );

        assert_eq!(
            provider.get_repository("mytenancy/absent").await.unwrap(),
            Lookup::Missing
        );
    }

    #[tokio::test]
    async fn create_is_idempotent_via_conflict_refetch() {
        let provider = provider(MockArtifacts::default().with_repo("ocid-1", "existing"));

        let record = provider
            .create_repository("mytenancy/existing")
            .await
            .unwrap();
        assert_eq!(record["id"], "ocid-1");
    }

    #[tokio::test]
    async fn create_conflict_with_vanished_repository_fails() {
        let provider = provider(MockArtifacts {
            create_conflicts: true,
            ..MockArtifacts::default()
        });

        let err = provider
            .create_repository("mytenancy/ghost")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot be found"));
    }

    #[tokio::test]
    async fn delete_resolves_the_ocid_and_tolerates_absence() {
        let api = MockArtifacts::default().with_repo("ocid-1", "doomed");
        let provider = provider(api);

        provider.delete_repository("mytenancy/doomed").await.unwrap();
        assert_eq!(
            provider.get_repository("mytenancy/doomed").await.unwrap(),
            Lookup::Missing
        );

        // A second delete finds nothing and still succeeds
        provider.delete_repository("mytenancy/doomed").await.unwrap();
    }

    #[tokio::test]
    async fn image_lookup_uses_the_repo_tag_display_name() {
        let provider = provider(
            MockArtifacts::default()
                .with_repo("ocid-1", "app")
                .with_image("app", "app:v1"),
        );

        match provider.get_image("mytenancy/app", "v1").await.unwrap() {
            Lookup::Found(record) => assert_eq!(record["displayName"], "app:v1"),
            Lookup::Missing => panic!("expected the image to be found"),
        }

        assert_eq!(
            provider.get_image("mytenancy/app", "v2").await.unwrap(),
            Lookup::Missing
        );
    }

    #[tokio::test]
    async fn tokens_are_unsupported() {
        let provider = provider(MockArtifacts::default());
        assert_eq!(provider.get_token().await.unwrap(), TokenGrant::Unsupported);
    }
}
