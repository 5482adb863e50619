use std::sync::Arc;

use crate::server::registry::RegistryProvider;

/// Shared state for HTTP handlers.
///
/// Everything in here is immutable after startup; requests never share
/// mutable state.
#[derive(Clone)]
pub struct AppState {
    /// The registry provider selected by the CLI subcommand
    pub provider: Arc<dyn RegistryProvider>,
    /// Shared secret for the auth gate; empty disables authentication
    pub auth_token: String,
    /// Version reported by the health endpoint
    pub version: &'static str,
}

impl AppState {
    pub fn new(provider: Arc<dyn RegistryProvider>, auth_token: String) -> Self {
        Self {
            provider,
            auth_token,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
