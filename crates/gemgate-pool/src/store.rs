use async_trait::async_trait;

/// Well-known key of the persisted rotation cursor. It is the only durable
/// piece of pool state; everything else is rebuilt from the secret file and
/// live traffic.
pub const CURSOR_KEY: &str = "rotator:current_index";

#[derive(Debug, thiserror::Error)]
#[error("cursor store error: {0}")]
pub struct CursorStoreError(pub String);

/// Durable home of the rotation cursor. Writes are fire-and-forget; the
/// value is a hint and losing an update only shifts where the next probe
/// starts.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// `None` when nothing was persisted yet or the read failed.
    async fn load_cursor(&self) -> Option<u64>;
    async fn store_cursor(&self, index: u64) -> Result<(), CursorStoreError>;
}

/// Volatile store for tests and for running without a database.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    value: std::sync::Mutex<Option<u64>>,
}

impl MemoryCursorStore {
    pub fn with_value(index: u64) -> Self {
        Self {
            value: std::sync::Mutex::new(Some(index)),
        }
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load_cursor(&self) -> Option<u64> {
        *self.value.lock().expect("cursor store lock poisoned")
    }

    async fn store_cursor(&self, index: u64) -> Result<(), CursorStoreError> {
        *self.value.lock().expect("cursor store lock poisoned") = Some(index);
        Ok(())
    }
}
