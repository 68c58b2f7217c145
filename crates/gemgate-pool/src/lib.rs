mod account;
pub mod client;
mod pool;
mod refresh;
mod store;

pub use account::{parse_accounts, AccountCredential};
pub use pool::{
    AccountPool, AccountStatus, CachedToken, ModelClass, PoolStatus, RateLimitEntry, SelectError,
    Selection, RATE_LIMIT_COOLDOWN_MS, TOKEN_EXPIRY_BUFFER_MS,
};
pub use refresh::{OAuthConfig, OAuthRefresher, RefreshError, RefreshedToken, TokenRefresher};
pub use store::{CursorStore, CursorStoreError, MemoryCursorStore, CURSOR_KEY};

/// Milliseconds since the Unix epoch, the unit used by credential files and
/// the cache/rate-limit bookkeeping.
pub fn now_unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
