use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use crate::server::state::AppState;

/// Protected registry routes.
///
/// Repository names may contain `/` (OCI names are `namespace/repo`), so the
/// name segments are wildcard captures.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/repos", get(handlers::list_repositories))
        .route(
            "/repo/{*name}",
            get(handlers::get_repository)
                .post(handlers::create_repository)
                .delete(handlers::delete_repository),
        )
        .route("/image/{*reference}", get(handlers::get_image))
        .route("/token", post(handlers::get_token))
}
