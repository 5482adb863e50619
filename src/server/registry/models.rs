use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Short-lived credential bundle for logging in to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryToken {
    /// Opaque login token as issued by the cloud
    pub token: String,
    /// When the token stops working (RFC 3339)
    pub expires: DateTime<Utc>,
    /// Registry endpoint the token is valid for, when the cloud reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}
