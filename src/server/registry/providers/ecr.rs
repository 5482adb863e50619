//! Amazon ECR provider.
//!
//! The normalization logic talks to ECR through the [`EcrApi`] trait so it
//! can be tested against an in-memory fake; [`SdkEcrApi`] is the production
//! implementation backed by the AWS SDK.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ecr::error::SdkError;
use aws_sdk_ecr::types::ImageIdentifier;
use aws_sdk_ecr::Client as EcrClient;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::server::registry::models::RegistryToken;
use crate::server::registry::{Lookup, RegistryProvider, TokenGrant};
use crate::settings::{validate_expiry, ConfigError, EcrSettings};

/// ECR failures classified at the adapter boundary. Nothing SDK-specific
/// crosses this line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EcrError {
    #[error("repository not found")]
    RepositoryNotFound,
    #[error("repository already exists")]
    RepositoryAlreadyExists,
    #[error("image not found")]
    ImageNotFound,
    #[error("lifecycle policy not found")]
    LifecyclePolicyNotFound,
    #[error("{0}")]
    Other(String),
}

/// Repository record as exposed on the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EcrRepository {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Image record as exposed on the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EcrImage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
    pub image_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size_in_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pushed_at: Option<DateTime<Utc>>,
}

/// One entry from `GetAuthorizationToken`.
#[derive(Debug, Clone)]
pub struct EcrAuthorization {
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub proxy_endpoint: Option<String>,
}

/// The ECR operations the provider needs, with classified errors.
#[async_trait]
pub trait EcrApi: Send + Sync {
    /// Describe all repositories, or just the named one
    async fn describe_repositories(&self, name: Option<&str>) -> Result<Vec<EcrRepository>, EcrError>;
    async fn describe_image(&self, repository: &str, tag: &str) -> Result<EcrImage, EcrError>;
    async fn create_repository(&self, name: &str) -> Result<EcrRepository, EcrError>;
    async fn put_lifecycle_policy(&self, repository: &str, policy_text: &str) -> Result<(), EcrError>;
    async fn delete_lifecycle_policy(&self, repository: &str) -> Result<(), EcrError>;
    async fn delete_repository(&self, name: &str) -> Result<(), EcrError>;
    async fn get_authorization_token(&self) -> Result<Vec<EcrAuthorization>, EcrError>;
}

/// Extract a clean error message from an AWS SDK error's Debug output.
///
/// The SDK errors have verbose Debug output; pull out the `message` field
/// when it is present.
fn format_sdk_error<E: std::fmt::Debug>(err: &E) -> String {
    let debug_str = format!("{:?}", err);

    if let Some(start) = debug_str.find("message: Some(\"") {
        let start = start + 15;
        if let Some(end) = debug_str[start..].find("\")") {
            return debug_str[start..start + end].to_string();
        }
    }

    if debug_str.len() > 200 {
        format!("{}...", &debug_str[..200])
    } else {
        debug_str
    }
}

fn map_sdk_error<E>(err: SdkError<E>, classify: impl FnOnce(&E) -> Option<EcrError>) -> EcrError
where
    SdkError<E>: std::fmt::Debug,
{
    if let Some(service_err) = err.as_service_error() {
        if let Some(mapped) = classify(service_err) {
            return mapped;
        }
    }
    EcrError::Other(format_sdk_error(&err))
}

fn to_chrono(dt: &aws_sdk_ecr::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn repository_record(repo: &aws_sdk_ecr::types::Repository) -> EcrRepository {
    EcrRepository {
        registry_id: repo.registry_id().map(String::from),
        repository_name: repo.repository_name().map(String::from),
        repository_arn: repo.repository_arn().map(String::from),
        repository_uri: repo.repository_uri().map(String::from),
        created_at: repo.created_at().and_then(to_chrono),
    }
}

fn image_record(image: &aws_sdk_ecr::types::ImageDetail) -> EcrImage {
    EcrImage {
        registry_id: image.registry_id().map(String::from),
        repository_name: image.repository_name().map(String::from),
        image_digest: image.image_digest().map(String::from),
        image_tags: image.image_tags().to_vec(),
        image_size_in_bytes: image.image_size_in_bytes(),
        image_pushed_at: image.image_pushed_at().and_then(to_chrono),
    }
}

/// Production [`EcrApi`] backed by the AWS SDK client.
pub struct SdkEcrApi {
    client: EcrClient,
    registry_id: Option<String>,
}

#[async_trait]
impl EcrApi for SdkEcrApi {
    async fn describe_repositories(&self, name: Option<&str>) -> Result<Vec<EcrRepository>, EcrError> {
        let mut request = self
            .client
            .describe_repositories()
            .set_registry_id(self.registry_id.clone());
        if let Some(name) = name {
            request = request.repository_names(name);
        }

        let mut repos = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut page = request.clone();
            if let Some(token) = &next_token {
                page = page.next_token(token);
            }
            let response = page.send().await.map_err(|err| {
                map_sdk_error(err, |e| {
                    e.is_repository_not_found_exception()
                        .then_some(EcrError::RepositoryNotFound)
                })
            })?;
            repos.extend(response.repositories().iter().map(repository_record));
            next_token = response.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }
        Ok(repos)
    }

    async fn describe_image(&self, repository: &str, tag: &str) -> Result<EcrImage, EcrError> {
        let response = self
            .client
            .describe_images()
            .set_registry_id(self.registry_id.clone())
            .repository_name(repository)
            .image_ids(ImageIdentifier::builder().image_tag(tag).build())
            .send()
            .await
            .map_err(|err| {
                map_sdk_error(err, |e| {
                    if e.is_image_not_found_exception() {
                        Some(EcrError::ImageNotFound)
                    } else if e.is_repository_not_found_exception() {
                        Some(EcrError::RepositoryNotFound)
                    } else {
                        None
                    }
                })
            })?;
        response
            .image_details()
            .first()
            .map(image_record)
            .ok_or(EcrError::ImageNotFound)
    }

    async fn create_repository(&self, name: &str) -> Result<EcrRepository, EcrError> {
        let response = self
            .client
            .create_repository()
            .set_registry_id(self.registry_id.clone())
            .repository_name(name)
            .send()
            .await
            .map_err(|err| {
                map_sdk_error(err, |e| {
                    e.is_repository_already_exists_exception()
                        .then_some(EcrError::RepositoryAlreadyExists)
                })
            })?;
        response
            .repository()
            .map(repository_record)
            .ok_or_else(|| EcrError::Other("no repository in create response".to_string()))
    }

    async fn put_lifecycle_policy(&self, repository: &str, policy_text: &str) -> Result<(), EcrError> {
        self.client
            .put_lifecycle_policy()
            .set_registry_id(self.registry_id.clone())
            .repository_name(repository)
            .lifecycle_policy_text(policy_text)
            .send()
            .await
            .map_err(|err| {
                map_sdk_error(err, |e| {
                    e.is_repository_not_found_exception()
                        .then_some(EcrError::RepositoryNotFound)
                })
            })?;
        Ok(())
    }

    async fn delete_lifecycle_policy(&self, repository: &str) -> Result<(), EcrError> {
        self.client
            .delete_lifecycle_policy()
            .set_registry_id(self.registry_id.clone())
            .repository_name(repository)
            .send()
            .await
            .map_err(|err| {
                map_sdk_error(err, |e| {
                    if e.is_lifecycle_policy_not_found_exception() {
                        Some(EcrError::LifecyclePolicyNotFound)
                    } else if e.is_repository_not_found_exception() {
                        Some(EcrError::RepositoryNotFound)
                    } else {
                        None
                    }
                })
            })?;
        Ok(())
    }

    async fn delete_repository(&self, name: &str) -> Result<(), EcrError> {
        self.client
            .delete_repository()
            .set_registry_id(self.registry_id.clone())
            .repository_name(name)
            .send()
            .await
            .map_err(|err| {
                map_sdk_error(err, |e| {
                    e.is_repository_not_found_exception()
                        .then_some(EcrError::RepositoryNotFound)
                })
            })?;
        Ok(())
    }

    async fn get_authorization_token(&self) -> Result<Vec<EcrAuthorization>, EcrError> {
        let response = self
            .client
            .get_authorization_token()
            .send()
            .await
            .map_err(|err| map_sdk_error(err, |_| None))?;
        Ok(response
            .authorization_data()
            .iter()
            .map(|auth| EcrAuthorization {
                token: auth.authorization_token().map(String::from),
                expires_at: auth.expires_at().and_then(to_chrono),
                proxy_endpoint: auth.proxy_endpoint().map(String::from),
            })
            .collect())
    }
}

const EXPIRE_RULE_PRIORITY: u32 = 1000;

/// One "expire after N days" lifecycle rule.
fn expire_rule(priority: u32, count_type: &str, count_number: u32) -> Value {
    json!({
        "rulePriority": priority,
        "description": format!("Delete images {count_type} {count_number} days"),
        "selection": {
            "tagStatus": "any",
            "countType": count_type,
            "countNumber": count_number,
            "countUnit": "days",
        },
        "action": {
            "type": "expire",
        },
    })
}

/// Build the lifecycle policy document for the configured expiry day counts.
///
/// Returns `None` when no expiry is configured. Conflicting or unimplemented
/// combinations are rejected before any network call.
pub fn lifecycle_policy_document(
    push_days: u32,
    pull_days: u32,
) -> Result<Option<String>, ConfigError> {
    validate_expiry(push_days, pull_days)?;
    if push_days == 0 {
        return Ok(None);
    }
    // https://docs.aws.amazon.com/AmazonECR/latest/userguide/LifecyclePolicies.html
    let document = json!({
        "rules": [expire_rule(EXPIRE_RULE_PRIORITY, "sinceImagePushed", push_days)],
    });
    Ok(Some(document.to_string()))
}

/// Amazon ECR registry provider.
pub struct EcrProvider {
    api: Arc<dyn EcrApi>,
    expires_after_push_days: u32,
    expires_after_pull_days: u32,
}

impl EcrProvider {
    pub fn new(api: Arc<dyn EcrApi>, settings: &EcrSettings) -> Self {
        Self {
            api,
            expires_after_push_days: settings.expires_after_push_days,
            expires_after_pull_days: settings.expires_after_pull_days,
        }
    }

    /// Load the default AWS credential chain and verify it works before
    /// serving any request.
    pub async fn connect(settings: &EcrSettings) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        let sts = aws_sdk_sts::Client::new(&aws_config);
        let identity = sts.get_caller_identity().send().await.map_err(|err| {
            anyhow!(
                "failed to resolve AWS caller identity: {}",
                format_sdk_error(&err)
            )
        })?;
        info!(
            arn = identity.arn(),
            registry_id = ?settings.registry_id,
            "Connected to Amazon ECR"
        );

        let api = SdkEcrApi {
            client: EcrClient::new(&aws_config),
            registry_id: settings.registry_id.clone(),
        };
        Ok(Self::new(Arc::new(api), settings))
    }

    async fn find_repository(&self, name: &str) -> Result<Lookup<EcrRepository>> {
        match self.api.describe_repositories(Some(name)).await {
            Ok(repos) => Ok(repos
                .into_iter()
                .next()
                .map(Lookup::Found)
                .unwrap_or(Lookup::Missing)),
            Err(EcrError::RepositoryNotFound) => Ok(Lookup::Missing),
            Err(err) => Err(anyhow::Error::from(err)
                .context(format!("failed to describe repository '{name}'"))),
        }
    }

    async fn apply_lifecycle_policy(&self, name: &str) -> Result<()> {
        let Some(policy) =
            lifecycle_policy_document(self.expires_after_push_days, self.expires_after_pull_days)?
        else {
            return Ok(());
        };
        self.api
            .put_lifecycle_policy(name, &policy)
            .await
            .map_err(|err| {
                anyhow::Error::from(err)
                    .context(format!("failed to set lifecycle policy for '{name}'"))
            })?;
        debug!(repository = name, policy = %policy, "Lifecycle policy set");
        Ok(())
    }
}

#[async_trait]
impl RegistryProvider for EcrProvider {
    async fn list_repositories(&self) -> Result<Vec<Value>> {
        let repos = self
            .api
            .describe_repositories(None)
            .await
            .map_err(|err| anyhow::Error::from(err).context("failed to list repositories"))?;
        repos
            .iter()
            .map(|repo| serde_json::to_value(repo).map_err(Into::into))
            .collect()
    }

    async fn get_repository(&self, name: &str) -> Result<Lookup<Value>> {
        match self.find_repository(name).await? {
            Lookup::Found(repo) => Ok(Lookup::Found(serde_json::to_value(repo)?)),
            Lookup::Missing => Ok(Lookup::Missing),
        }
    }

    async fn get_image(&self, name: &str, tag: &str) -> Result<Lookup<Value>> {
        match self.api.describe_image(name, tag).await {
            Ok(image) => Ok(Lookup::Found(serde_json::to_value(image)?)),
            Err(EcrError::ImageNotFound | EcrError::RepositoryNotFound) => {
                debug!(repository = name, tag, "Image not found");
                Ok(Lookup::Missing)
            }
            Err(err) => Err(anyhow::Error::from(err)
                .context(format!("failed to describe image '{name}:{tag}'"))),
        }
    }

    async fn create_repository(&self, name: &str) -> Result<Value> {
        let record = match self.api.create_repository(name).await {
            Ok(repo) => serde_json::to_value(repo)?,
            Err(EcrError::RepositoryAlreadyExists) => {
                debug!(repository = name, "Repository already exists");
                match self.find_repository(name).await? {
                    Lookup::Found(repo) => serde_json::to_value(repo)?,
                    Lookup::Missing => {
                        bail!("repository '{name}' reported as existing but cannot be found")
                    }
                }
            }
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("failed to create repository '{name}'")))
            }
        };

        // No rollback when this fails: the repository stays without a policy
        self.apply_lifecycle_policy(name).await?;
        Ok(record)
    }

    async fn delete_repository(&self, name: &str) -> Result<()> {
        match self.api.delete_lifecycle_policy(name).await {
            Ok(()) => debug!(repository = name, "Lifecycle policy deleted"),
            Err(EcrError::LifecyclePolicyNotFound | EcrError::RepositoryNotFound) => {
                debug!(repository = name, "No lifecycle policy to delete")
            }
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("failed to delete lifecycle policy for '{name}'")))
            }
        }

        match self.api.delete_repository(name).await {
            Ok(()) => Ok(()),
            Err(EcrError::RepositoryNotFound) => {
                debug!(repository = name, "Repository already absent");
                Ok(())
            }
            Err(err) => Err(anyhow::Error::from(err)
                .context(format!("failed to delete repository '{name}'"))),
        }
    }

    async fn get_token(&self) -> Result<TokenGrant> {
        let mut auths = self
            .api
            .get_authorization_token()
            .await
            .map_err(|err| anyhow::Error::from(err).context("failed to get authorization token"))?;
        if auths.len() != 1 {
            bail!("expected 1 authorization token, got {}", auths.len());
        }
        let auth = auths.remove(0);
        Ok(TokenGrant::Issued(RegistryToken {
            token: auth.token.context("authorization data has no token")?,
            expires: auth.expires_at.context("authorization data has no expiry")?,
            registry: auth.proxy_endpoint,
        }))
    }
}
