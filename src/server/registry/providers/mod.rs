pub mod ecr;
pub mod oci;

use std::sync::Arc;

use anyhow::Result;

use crate::server::registry::RegistryProvider;
use crate::settings::ProviderSettings;

/// Connect the provider selected at startup.
pub async fn connect(settings: &ProviderSettings) -> Result<Arc<dyn RegistryProvider>> {
    match settings {
        ProviderSettings::Amazon(ecr) => Ok(Arc::new(ecr::EcrProvider::connect(ecr).await?)),
        ProviderSettings::Oracle(oci) => Ok(Arc::new(oci::OciProvider::connect(oci).await?)),
    }
}
