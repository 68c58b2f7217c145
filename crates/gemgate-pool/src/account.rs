use serde::{Deserialize, Serialize};

use crate::pool::CachedToken;

/// One account of the credential pool, as stored in the secret file.
///
/// Loaded once at startup and never mutated; a stale `access_token` is
/// superseded in the token cache, not rewritten here. `project_id` is
/// required by the upstream — accounts lacking it are still routed, the
/// upstream rejects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCredential {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl AccountCredential {
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.trim().is_empty()
    }

    /// An access token embedded in the secret file is admitted into the
    /// cache if it is still outside the expiry buffer window.
    pub(crate) fn seed_token(&self, now_ms: i64) -> Option<CachedToken> {
        if self.access_token.is_empty() {
            return None;
        }
        let expires_at = self.expiry_date?;
        let token = CachedToken {
            access_token: self.access_token.clone(),
            expires_at,
        };
        token.is_fresh(now_ms).then_some(token)
    }
}

/// Parses the secret file: a JSON array of account credentials.
pub fn parse_accounts(bytes: &[u8]) -> Result<Vec<AccountCredential>, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TOKEN_EXPIRY_BUFFER_MS;

    #[test]
    fn parses_camel_case_secret_file() {
        let raw = br#"[{
            "accessToken": "ya29.a0",
            "refreshToken": "1//r",
            "scope": "https://www.googleapis.com/auth/cloud-platform",
            "tokenType": "Bearer",
            "expiryDate": 1700000000000,
            "projectId": "proj-1"
        }]"#;
        let accounts = parse_accounts(raw).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].project_id.as_deref(), Some("proj-1"));
        assert!(accounts[0].has_refresh_token());
    }

    #[test]
    fn seed_token_respects_buffer_window() {
        let now = 1_700_000_000_000;
        let mut account = AccountCredential {
            access_token: "tok".to_string(),
            refresh_token: "ref".to_string(),
            scope: None,
            token_type: None,
            id_token: None,
            expiry_date: Some(now + TOKEN_EXPIRY_BUFFER_MS + 1_000),
            project_id: None,
        };
        assert!(account.seed_token(now).is_some());

        account.expiry_date = Some(now + TOKEN_EXPIRY_BUFFER_MS - 1_000);
        assert!(account.seed_token(now).is_none());

        account.access_token.clear();
        assert!(account.seed_token(now).is_none());
    }
}
