use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("missing required gateway config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged configuration used by the running process.
///
/// Merge order: CLI > ENV > compiled defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Optional inbound gateway key; requests must bear it when set.
    pub api_key: Option<String>,
    /// Path of the credential-pool secret file.
    pub credentials_path: String,
    /// Database DSN holding the persisted rotation cursor.
    pub dsn: String,
    pub upstream_base_url: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_token_url: String,
    /// Surface upstream "thought" parts to callers, wrapped in markers.
    pub thinking_as_content: bool,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
}

/// Values accepted in config templates that mean "not actually configured".
const PLACEHOLDER_VALUES: &[&str] = &[
    "",
    "YOUR_CLIENT_ID",
    "YOUR_CLIENT_SECRET",
    "changeme",
];

pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    PLACEHOLDER_VALUES
        .iter()
        .any(|candidate| trimmed.eq_ignore_ascii_case(candidate))
}
