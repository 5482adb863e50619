//! Signed REST client for the OCI Artifacts and Object Storage APIs.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use super::sign::RequestSigner;
use super::{ArtifactsApi, ContainerImageSummary, ContainerRepositorySummary};

const ARTIFACTS_API_VERSION: &str = "20160918";

/// OCI failures classified at the REST boundary.
#[derive(Debug, Error)]
pub enum OciError {
    /// The service's "repository already exists" error
    #[error("repository already exists in the namespace")]
    NamespaceConflict,
    #[error("{code}: {message} (http status {status})")]
    Service {
        status: u16,
        code: String,
        message: String,
    },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}

pub struct OciRestClient {
    http: reqwest::Client,
    signer: RequestSigner,
    region: String,
    compartment_id: String,
}

fn query(pairs: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in pairs {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

fn decode<T: DeserializeOwned>(item: Value) -> Result<T, OciError> {
    serde_json::from_value(item)
        .map_err(|err| OciError::Other(format!("unexpected response shape: {err}")))
}

impl OciRestClient {
    pub fn new(signer: RequestSigner, region: String, compartment_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            signer,
            region,
            compartment_id,
        }
    }

    fn artifacts_host(&self) -> String {
        format!("artifacts.{}.oci.oraclecloud.com", self.region)
    }

    async fn send(
        &self,
        method: Method,
        host: &str,
        path_and_query: &str,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, OciError> {
        let headers = self
            .signer
            .sign(
                method.as_str(),
                host,
                path_and_query,
                body.as_deref(),
                Utc::now(),
            )
            .map_err(|err| OciError::Other(format!("{err:#}")))?;

        let mut request = self.http.request(method, format!("https://{host}{path_and_query}"));
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify_error_response(response).await)
        }
    }

    /// Follow `opc-next-page` and collect every `items` entry.
    async fn list_paged(&self, path: &str, base_query: &str) -> Result<Vec<Value>, OciError> {
        let host = self.artifacts_host();
        let mut items = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let mut path_and_query = format!("{path}?{base_query}");
            if let Some(page) = &page {
                path_and_query.push('&');
                path_and_query.push_str(&query(&[("page", page.as_str())]));
            }
            let response = self.send(Method::GET, &host, &path_and_query, None).await?;
            page = response
                .headers()
                .get("opc-next-page")
                .and_then(|value| value.to_str().ok())
                .map(String::from);
            let collection: Value = response.json().await?;
            if let Some(page_items) = collection["items"].as_array() {
                items.extend(page_items.iter().cloned());
            }
            if page.is_none() {
                return Ok(items);
            }
        }
    }

    /// Fetch the tenancy's Object Storage namespace, which doubles as the
    /// registry namespace prefix.
    pub async fn namespace(&self) -> Result<String, OciError> {
        let host = format!("objectstorage.{}.oraclecloud.com", self.region);
        let response = self.send(Method::GET, &host, "/n/", None).await?;
        decode(response.json().await?)
    }
}

async fn classify_error_response(response: reqwest::Response) -> OciError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<Value>(&body) {
        Ok(value) => (
            value["code"].as_str().unwrap_or("Unknown").to_string(),
            value["message"].as_str().unwrap_or(&body).to_string(),
        ),
        Err(_) => ("Unknown".to_string(), body.clone()),
    };
    if code == "NAMESPACE_CONFLICT" {
        return OciError::NamespaceConflict;
    }
    OciError::Service {
        status,
        code,
        message,
    }
}

#[async_trait]
impl ArtifactsApi for OciRestClient {
    async fn list_repositories(
        &self,
        display_name: Option<&str>,
    ) -> Result<Vec<ContainerRepositorySummary>, OciError> {
        let mut pairs = vec![("compartmentId", self.compartment_id.as_str())];
        if let Some(name) = display_name {
            pairs.push(("displayName", name));
        }
        let items = self
            .list_paged(
                &format!("/{ARTIFACTS_API_VERSION}/container/repositories"),
                &query(&pairs),
            )
            .await?;
        items.into_iter().map(decode).collect()
    }

    async fn list_images(
        &self,
        repository_name: &str,
        display_name: &str,
    ) -> Result<Vec<ContainerImageSummary>, OciError> {
        let items = self
            .list_paged(
                &format!("/{ARTIFACTS_API_VERSION}/container/images"),
                &query(&[
                    ("compartmentId", self.compartment_id.as_str()),
                    ("repositoryName", repository_name),
                    ("displayName", display_name),
                ]),
            )
            .await?;
        items.into_iter().map(decode).collect()
    }

    async fn create_repository(
        &self,
        display_name: &str,
    ) -> Result<ContainerRepositorySummary, OciError> {
        let body = json!({
            "compartmentId": self.compartment_id,
            "displayName": display_name,
        });
        let response = self
            .send(
                Method::POST,
                &self.artifacts_host(),
                &format!("/{ARTIFACTS_API_VERSION}/container/repositories"),
                Some(body.to_string().into_bytes()),
            )
            .await?;
        decode(response.json().await?)
    }

    async fn delete_repository(&self, id: &str) -> Result<(), OciError> {
        self.send(
            Method::DELETE,
            &self.artifacts_host(),
            &format!("/{ARTIFACTS_API_VERSION}/container/repositories/{id}"),
            None,
        )
        .await?;
        Ok(())
    }
}
