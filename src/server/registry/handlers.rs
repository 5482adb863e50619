use anyhow::{bail, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use super::{Lookup, TokenGrant};
use crate::server::error::ServerError;
use crate::server::state::AppState;

/// 404 with a `null` body, used for expected absences and unmatched routes
pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(Value::Null)).into_response()
}

/// Split an image reference into repository name and tag.
///
/// The tag defaults to `latest`; the split is on the last `:` so that the
/// name may contain `/`.
fn split_image_reference(reference: &str) -> Result<(&str, &str)> {
    match reference.rsplit_once(':') {
        Some((_, tag)) if tag.is_empty() => {
            bail!("invalid tag in image reference: {reference}")
        }
        Some((name, tag)) => Ok((name, tag)),
        None => Ok((reference, "latest")),
    }
}

pub async fn list_repositories(
    State(state): State<AppState>,
) -> Result<Json<Vec<Value>>, ServerError> {
    tracing::info!("Listing repositories");
    let repos = state.provider.list_repositories().await?;
    Ok(Json(repos))
}

pub async fn get_repository(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ServerError> {
    tracing::info!(%name, "Getting repository");
    match state.provider.get_repository(&name).await? {
        Lookup::Found(record) => Ok(Json(record).into_response()),
        Lookup::Missing => Ok(not_found().await),
    }
}

pub async fn get_image(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Response, ServerError> {
    let (name, tag) = split_image_reference(&reference)?;
    tracing::info!(%name, %tag, "Getting image");
    match state.provider.get_image(name, tag).await? {
        Lookup::Found(record) => Ok(Json(record).into_response()),
        Lookup::Missing => Ok(not_found().await),
    }
}

pub async fn create_repository(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ServerError> {
    tracing::info!(%name, "Creating repository");
    let record = state.provider.create_repository(&name).await?;
    Ok(Json(record))
}

pub async fn delete_repository(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ServerError> {
    tracing::info!(%name, "Deleting repository");
    state.provider.delete_repository(&name).await?;
    Ok(StatusCode::OK)
}

pub async fn get_token(State(state): State<AppState>) -> Result<Response, ServerError> {
    tracing::info!("Issuing registry token");
    match state.provider.get_token().await? {
        TokenGrant::Issued(token) => Ok(Json(token).into_response()),
        TokenGrant::Unsupported => Err(ServerError::not_found("not implemented")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::server::registry::testing::{FakeProvider, FakeToken};
    use crate::server::{build_router, AppState};

    fn app(provider: FakeProvider) -> axum::Router {
        build_router(AppState::new(Arc::new(provider), String::new()))
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn image_reference_splitting() {
        assert_eq!(split_image_reference("repo").unwrap(), ("repo", "latest"));
        assert_eq!(split_image_reference("repo:v1").unwrap(), ("repo", "v1"));
        assert_eq!(
            split_image_reference("ns/repo:v1").unwrap(),
            ("ns/repo", "v1")
        );
        assert!(split_image_reference("repo:").is_err());
    }

    #[tokio::test]
    async fn list_repositories_returns_json_array() {
        let provider = FakeProvider::default();
        provider
            .repos
            .lock()
            .unwrap()
            .insert("a".to_string(), json!({ "repositoryName": "a" }));
        let response = app(provider)
            .oneshot(request("GET", "/repos"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "application/json"
        );
        let value = body_json(response).await;
        assert_eq!(value, json!([{ "repositoryName": "a" }]));
    }

    #[tokio::test]
    async fn missing_repository_is_404_null() {
        let response = app(FakeProvider::default())
            .oneshot(request("GET", "/repo/nothing-here"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"null");
    }

    #[tokio::test]
    async fn create_then_get_round_trip() {
        let app = app(FakeProvider::default());

        let response = app
            .clone()
            .oneshot(request("POST", "/repo/new-image"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(request("GET", "/repo/new-image")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["repositoryName"], "new-image");
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let app = app(FakeProvider::default());

        let first = app
            .clone()
            .oneshot(request("POST", "/repo/twice"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first_record = body_json(first).await;

        let second = app
            .clone()
            .oneshot(request("POST", "/repo/twice"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(body_json(second).await, first_record);

        // No duplicate was created
        let repos = body_json(app.oneshot(request("GET", "/repos")).await.unwrap()).await;
        assert_eq!(repos.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_of_absent_repository_succeeds() {
        let response = app(FakeProvider::default())
            .oneshot(request("DELETE", "/repo/never-existed"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn repository_names_may_contain_slashes() {
        let app = app(FakeProvider::default());
        let response = app
            .clone()
            .oneshot(request("POST", "/repo/namespace/new-image"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["repositoryName"], "namespace/new-image");
    }

    #[tokio::test]
    async fn image_lookup_defaults_to_latest_tag() {
        let provider = FakeProvider::default()
            .with_image("busybox", "latest", json!({ "imageDigest": "sha256:aa" }))
            .with_image("busybox", "v2", json!({ "imageDigest": "sha256:bb" }));
        let app = app(provider);

        let response = app
            .clone()
            .oneshot(request("GET", "/image/busybox"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["imageDigest"], "sha256:aa");

        let response = app
            .clone()
            .oneshot(request("GET", "/image/busybox:v2"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["imageDigest"], "sha256:bb");
    }

    #[tokio::test]
    async fn missing_image_is_404_null() {
        let response = app(FakeProvider::default())
            .oneshot(request("GET", "/image/ghost:latest"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"null");
    }

    #[tokio::test]
    async fn token_endpoint_returns_credential_bundle() {
        let provider = FakeProvider {
            token: FakeToken::Issued {
                registry: Some("registry.test".to_string()),
            },
            ..FakeProvider::default()
        };
        let response = app(provider)
            .oneshot(request("POST", "/token"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["token"], "QVdTOnBhc3N3b3Jk");
        assert_eq!(value["expires"], "2024-05-01T12:00:00Z");
        assert_eq!(value["registry"], "registry.test");
    }

    #[tokio::test]
    async fn token_endpoint_is_404_when_unsupported() {
        let response = app(FakeProvider::default())
            .oneshot(request("POST", "/token"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let value = body_json(response).await;
        assert_eq!(value["error"], "not implemented");
    }

    #[tokio::test]
    async fn token_contract_violations_surface_as_500() {
        let provider = FakeProvider {
            token: FakeToken::Broken,
            ..FakeProvider::default()
        };
        let response = app(provider)
            .oneshot(request("POST", "/token"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn provider_failures_surface_as_500_with_error_body() {
        let provider = FakeProvider {
            failure: Some("cloud exploded".to_string()),
            ..FakeProvider::default()
        };
        let response = app(provider)
            .oneshot(request("GET", "/repos"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let value = body_json(response).await;
        assert_eq!(value["error"], "cloud exploded");
    }

    #[tokio::test]
    async fn unknown_paths_are_404_null() {
        let response = app(FakeProvider::default())
            .oneshot(request("GET", "/definitely/not/a/route"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"null");
    }

    #[tokio::test]
    async fn mismatched_methods_are_404_null() {
        let response = app(FakeProvider::default())
            .oneshot(request("PUT", "/repo/some-repo"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
