use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::HeaderValue;
use serde::{Deserialize, Serialize};

use gemgate_common::is_placeholder;

use crate::account::AccountCredential;
use crate::client::shared_client;
use crate::now_unix_ms;

const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const DEFAULT_CLIENT_SECRET: &str = "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";

/// Fallback lifetime when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: DEFAULT_CLIENT_SECRET.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }
}

impl OAuthConfig {
    /// CLI/env overrides win; placeholder or empty values fall back to the
    /// compiled defaults.
    pub fn from_overrides(
        client_id: Option<&str>,
        client_secret: Option<&str>,
        token_url: Option<&str>,
    ) -> Self {
        let mut config = Self::default();
        if let Some(value) = client_id.filter(|value| !value.trim().is_empty()) {
            config.client_id = value.trim().to_string();
        }
        if let Some(value) = client_secret.filter(|value| !value.trim().is_empty()) {
            config.client_secret = value.trim().to_string();
        }
        if let Some(value) = token_url.filter(|value| !value.trim().is_empty()) {
            config.token_url = value.trim().to_string();
        }
        config
    }

    pub fn has_real_client(&self) -> bool {
        !is_placeholder(&self.client_id) && !is_placeholder(&self.client_secret)
    }
}

#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Unix milliseconds: refresh time + `expires_in`.
    pub expires_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("oauth client identity is not configured")]
    ClientNotConfigured,
    #[error("account has no refresh token")]
    MissingRefreshToken,
    #[error("token endpoint unreachable: {0}")]
    Network(String),
    #[error("token endpoint rejected the refresh: {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("token endpoint response malformed: {0}")]
    Decode(String),
}

/// Seam between the token cache and the OAuth2 token endpoint.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, account: &AccountCredential) -> Result<RefreshedToken, RefreshError>;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug)]
pub struct OAuthRefresher {
    config: OAuthConfig,
    proxy: Option<String>,
}

impl OAuthRefresher {
    pub fn new(config: OAuthConfig, proxy: Option<String>) -> Self {
        Self { config, proxy }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, account: &AccountCredential) -> Result<RefreshedToken, RefreshError> {
        // A placeholder client identity is a configuration fault, not a
        // network problem; fail before touching the wire.
        if !self.config.has_real_client() {
            return Err(RefreshError::ClientNotConfigured);
        }
        if !account.has_refresh_token() {
            return Err(RefreshError::MissingRefreshToken);
        }

        let client = shared_client(self.proxy.as_deref())
            .map_err(|err| RefreshError::Network(err.to_string()))?;
        let request = RefreshRequest {
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            refresh_token: &account.refresh_token,
            grant_type: "refresh_token",
        };
        let response = client
            .post(&self.config.token_url)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .form(&request)
            .send()
            .await
            .map_err(|err| RefreshError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let payload = response
            .json::<RefreshResponse>()
            .await
            .map_err(|err| RefreshError::Decode(err.to_string()))?;
        let access_token = payload
            .access_token
            .ok_or_else(|| RefreshError::Decode("missing access_token".to_string()))?;
        let expires_in = payload.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Ok(RefreshedToken {
            access_token,
            expires_at: now_unix_ms() + expires_in * 1000,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_fall_back_to_compiled_defaults() {
        let config = OAuthConfig::from_overrides(Some("  "), None, Some("https://example/token"));
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(config.client_secret, DEFAULT_CLIENT_SECRET);
        assert_eq!(config.token_url, "https://example/token");
        assert!(config.has_real_client());
    }

    #[test]
    fn placeholder_client_is_not_real() {
        let config = OAuthConfig {
            client_id: "YOUR_CLIENT_ID".to_string(),
            ..OAuthConfig::default()
        };
        assert!(!config.has_real_client());
    }

    #[tokio::test]
    async fn placeholder_client_fails_without_network() {
        let refresher = OAuthRefresher::new(
            OAuthConfig {
                client_id: String::new(),
                client_secret: String::new(),
                // An unroutable URL: reaching the network would error
                // differently than ClientNotConfigured.
                token_url: "http://invalid.invalid/token".to_string(),
            },
            None,
        );
        let account = AccountCredential {
            access_token: String::new(),
            refresh_token: "1//r".to_string(),
            scope: None,
            token_type: None,
            id_token: None,
            expiry_date: None,
            project_id: None,
        };
        let err = refresher.refresh(&account).await.unwrap_err();
        assert!(matches!(err, RefreshError::ClientNotConfigured));
    }
}
