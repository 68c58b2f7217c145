use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::account::AccountCredential;
use crate::now_unix_ms;
use crate::refresh::TokenRefresher;
use crate::store::CursorStore;

/// A token expiring inside this window is treated as already stale, so a
/// request never departs with a token that could expire mid-flight.
pub const TOKEN_EXPIRY_BUFFER_MS: i64 = 5 * 60 * 1000;

/// How long an account sits out a model class after a rate-limit report.
pub const RATE_LIMIT_COOLDOWN_MS: i64 = 60 * 1000;

/// Coarse model bucket with an independent rate-limit cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelClass {
    Pro,
    Flash,
}

impl ModelClass {
    /// Class membership is a substring rule: anything mentioning "pro" is
    /// the heavyweight class, everything else rides the flash lane.
    pub fn of(model_id: &str) -> Self {
        if model_id.to_ascii_lowercase().contains("pro") {
            Self::Pro
        } else {
            Self::Flash
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pro => "pro",
            Self::Flash => "flash",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: i64,
}

impl CachedToken {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        self.expires_at - TOKEN_EXPIRY_BUFFER_MS > now_ms
    }
}

/// Per-account penalty record. Both class flags share one deadline; the
/// entry is logically gone once `now >= limited_until` and is evicted the
/// next time it is consulted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitEntry {
    pub pro_limited: bool,
    pub flash_limited: bool,
    pub limited_until: i64,
}

impl RateLimitEntry {
    fn limits(&self, class: ModelClass) -> bool {
        match class {
            ModelClass::Pro => self.pro_limited,
            ModelClass::Flash => self.flash_limited,
        }
    }

    pub fn expired(&self, now_ms: i64) -> bool {
        now_ms >= self.limited_until
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error("no upstream credentials are configured")]
    NoCredentials,
    #[error("all accounts are rate limited for this model class")]
    AllRateLimited,
    #[error("token refresh failed for every usable account")]
    AllTokenRefreshFailed,
}

impl SelectError {
    pub fn kind(self) -> &'static str {
        match self {
            Self::NoCredentials => "no_credentials",
            Self::AllRateLimited => "all_rate_limited",
            Self::AllTokenRefreshFailed => "all_token_refresh_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub index: usize,
    pub access_token: String,
    /// Empty when the credential file lacked a project; the upstream will
    /// reject such requests, which is the specified behavior.
    pub project_id: String,
}

#[derive(Debug, Default)]
struct PoolState {
    tokens: HashMap<usize, CachedToken>,
    limits: HashMap<usize, RateLimitEntry>,
    /// Accounts whose embedded file token was already offered to the cache.
    /// A seed is admitted at most once; after invalidation the account must
    /// go through a real refresh.
    seeded: HashSet<usize>,
    cursor: usize,
}

impl PoolState {
    /// Consults the penalty record, evicting it first if the cooldown has
    /// elapsed (no background sweep exists).
    fn is_limited(&mut self, index: usize, class: ModelClass, now_ms: i64) -> bool {
        match self.limits.get(&index) {
            Some(entry) if entry.expired(now_ms) => {
                self.limits.remove(&index);
                false
            }
            Some(entry) => entry.limits(class),
            None => false,
        }
    }
}

/// The credential-pool coordinator: account list, token cache, rate-limit
/// tracker, and rotation cursor.
///
/// All three maps are guarded by one mutex and mutated as a unit; refresh
/// and upstream I/O happen outside the lock so one request's network wait
/// never stalls another request's bookkeeping.
pub struct AccountPool {
    accounts: Arc<Vec<AccountCredential>>,
    state: Mutex<PoolState>,
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn CursorStore>,
}

impl std::fmt::Debug for AccountPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountPool")
            .field("accounts", &self.accounts.len())
            .finish()
    }
}

impl AccountPool {
    /// Builds the pool and restores the persisted cursor. Part of the
    /// blocking startup phase: no request is served before this returns.
    pub async fn bootstrap(
        accounts: Vec<AccountCredential>,
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<dyn CursorStore>,
    ) -> Self {
        let restored = store.load_cursor().await.unwrap_or(0) as usize;
        // The stored value is a hint; clamp it so a pool that shrank since
        // the last run still starts inside [0, len).
        let cursor = if accounts.is_empty() {
            0
        } else {
            restored % accounts.len()
        };
        Self {
            accounts: Arc::new(accounts),
            state: Mutex::new(PoolState {
                cursor,
                ..PoolState::default()
            }),
            refresher,
            store,
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Indices of accounts that can never be refreshed; surfaced by the
    /// configuration check.
    pub fn accounts_missing_refresh_token(&self) -> Vec<usize> {
        self.accounts
            .iter()
            .enumerate()
            .filter(|(_, account)| !account.has_refresh_token())
            .map(|(index, _)| index)
            .collect()
    }

    /// Picks an account for the given model class.
    ///
    /// Probes at most `len()` accounts in rotation order starting at the
    /// cursor. Rate-limited candidates are skipped; candidates whose token
    /// cannot be obtained count as refresh failures. When a probe other
    /// than the first succeeds, the cursor advances to it and the new value
    /// is persisted without blocking the response path.
    pub async fn select_account(&self, class: ModelClass) -> Result<Selection, SelectError> {
        let size = self.accounts.len();
        if size == 0 {
            return Err(SelectError::NoCredentials);
        }

        let start = self.state.lock().await.cursor % size;
        let mut rate_limited = 0usize;

        for attempt in 0..size {
            let index = (start + attempt) % size;
            let now_ms = now_unix_ms();
            {
                let mut state = self.state.lock().await;
                if state.is_limited(index, class, now_ms) {
                    debug!(account = index, class = class.as_str(), "skipping rate-limited account");
                    rate_limited += 1;
                    continue;
                }
            }

            let Some(access_token) = self.token_for(index).await else {
                continue;
            };

            if attempt > 0 {
                let mut state = self.state.lock().await;
                state.cursor = index;
                drop(state);
                self.persist_cursor(index);
            }

            let project_id = self.accounts[index].project_id.clone().unwrap_or_default();
            return Ok(Selection {
                index,
                access_token,
                project_id,
            });
        }

        // Every probe failed. When some accounts were merely cooling down
        // the caller can retry; but any refresh failure points at broken
        // client credentials, and that diagnosis deliberately wins in the
        // mixed case.
        if rate_limited == size {
            Err(SelectError::AllRateLimited)
        } else {
            Err(SelectError::AllTokenRefreshFailed)
        }
    }

    /// Returns a token guaranteed to live past the expiry buffer window, or
    /// `None` if the account cannot produce one right now. A failed refresh
    /// leaves any previous cache entry untouched.
    pub async fn token_for(&self, index: usize) -> Option<String> {
        let account = self.accounts.get(index)?;
        let now_ms = now_unix_ms();

        {
            let mut state = self.state.lock().await;
            if let Some(cached) = state.tokens.get(&index) {
                if cached.is_fresh(now_ms) {
                    return Some(cached.access_token.clone());
                }
            } else if state.seeded.insert(index) {
                if let Some(seed) = account.seed_token(now_ms) {
                    let token = seed.access_token.clone();
                    state.tokens.insert(index, seed);
                    return Some(token);
                }
            }
        }

        // Refresh outside the lock; a concurrent refresh for the same index
        // simply overwrites, which matches the cache's replace-not-merge
        // contract.
        let refreshed = match self.refresher.refresh(account).await {
            Ok(token) => token,
            Err(err) => {
                warn!(account = index, error = %err, "token refresh failed");
                return None;
            }
        };

        let token = CachedToken {
            access_token: refreshed.access_token,
            expires_at: refreshed.expires_at,
        };
        let usable = token.is_fresh(now_unix_ms());
        let access_token = token.access_token.clone();
        self.state.lock().await.tokens.insert(index, token);
        if !usable {
            warn!(account = index, "refreshed token already inside expiry buffer");
            return None;
        }
        Some(access_token)
    }

    /// Records an upstream rate-limit hit: flags the class, restarts the
    /// shared cooldown deadline, and advances the cursor so the very next
    /// selection prefers a different account.
    pub async fn report_limit(&self, index: usize, class: ModelClass) {
        let size = self.accounts.len();
        if size == 0 {
            return;
        }
        let next = (index + 1) % size;
        {
            let mut state = self.state.lock().await;
            let entry = state.limits.entry(index).or_default();
            match class {
                ModelClass::Pro => entry.pro_limited = true,
                ModelClass::Flash => entry.flash_limited = true,
            }
            entry.limited_until = now_unix_ms() + RATE_LIMIT_COOLDOWN_MS;
            state.cursor = next;
        }
        warn!(account = index, class = class.as_str(), "account rate limited, rotating");
        self.persist_cursor(next);
    }

    pub async fn is_limited(&self, index: usize, class: ModelClass, now_ms: i64) -> bool {
        self.state.lock().await.is_limited(index, class, now_ms)
    }

    /// Drops the cached token for one account, typically after an upstream
    /// 401 proved it invalid. The credential itself is untouched.
    pub async fn invalidate_token(&self, index: usize) {
        self.state.lock().await.tokens.remove(&index);
    }

    /// Per-account cache/rate-limit snapshot for the diagnostic surface.
    pub async fn status(&self) -> PoolStatus {
        let now_ms = now_unix_ms();
        let mut state = self.state.lock().await;
        let accounts = self
            .accounts
            .iter()
            .enumerate()
            .map(|(index, account)| {
                let token = state.tokens.get(&index);
                let limited = state
                    .limits
                    .get(&index)
                    .filter(|entry| !entry.expired(now_ms))
                    .cloned();
                AccountStatus {
                    index,
                    project_id: account.project_id.clone(),
                    has_refresh_token: account.has_refresh_token(),
                    has_cached_token: token.is_some(),
                    token_expires_at: token.map(|cached| cached.expires_at),
                    pro_limited: limited.as_ref().is_some_and(|entry| entry.pro_limited),
                    flash_limited: limited.as_ref().is_some_and(|entry| entry.flash_limited),
                    limited_until: limited.map(|entry| entry.limited_until),
                }
            })
            .collect();
        PoolStatus {
            cursor: state.cursor,
            accounts,
        }
    }

    fn persist_cursor(&self, index: usize) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.store_cursor(index as u64).await {
                warn!(index, error = %err, "rotation cursor persist failed");
            }
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub index: usize,
    pub project_id: Option<String>,
    pub has_refresh_token: bool,
    pub has_cached_token: bool,
    pub token_expires_at: Option<i64>,
    pub pro_limited: bool,
    pub flash_limited: bool,
    pub limited_until: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub cursor: usize,
    pub accounts: Vec<AccountStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_class_substring_rule() {
        assert_eq!(ModelClass::of("gemini-2.5-pro"), ModelClass::Pro);
        assert_eq!(ModelClass::of("GEMINI-PRO-LATEST"), ModelClass::Pro);
        assert_eq!(ModelClass::of("gemini-2.5-flash"), ModelClass::Flash);
        assert_eq!(ModelClass::of("something-else"), ModelClass::Flash);
    }

    #[test]
    fn rate_limit_entry_shares_one_deadline() {
        let entry = RateLimitEntry {
            pro_limited: true,
            flash_limited: false,
            limited_until: 1_000,
        };
        assert!(entry.limits(ModelClass::Pro));
        assert!(!entry.limits(ModelClass::Flash));
        assert!(!entry.expired(999));
        assert!(entry.expired(1_000));
    }
}
