pub mod entities;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, Schema,
};
use time::OffsetDateTime;

use gemgate_pool::{CursorStore, CursorStoreError, CURSOR_KEY};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
}

/// Key/value persistence for gateway state. Only the rotation cursor lives
/// here today; the schema is generic so later state needs no migration.
#[derive(Clone)]
pub struct StateStorage {
    db: DatabaseConnection,
}

impl StateStorage {
    /// Opens one connection for the given dsn. Called once at bootstrap;
    /// the handle is cloned wherever storage is needed.
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA journal_mode = WAL").await?;
        }
        Ok(Self { db })
    }

    /// Entity-first schema sync, run once at bootstrap.
    pub async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::KvState)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    pub async fn load_value(&self, key: &str) -> StorageResult<Option<String>> {
        let row = entities::KvState::find_by_id(key.to_string())
            .one(&self.db)
            .await?;
        Ok(row.map(|model| model.value))
    }

    pub async fn store_value(&self, key: &str, value: &str) -> StorageResult<()> {
        use entities::kv_state::ActiveModel as KvActive;

        let now = OffsetDateTime::now_utc();
        let existing = entities::KvState::find_by_id(key.to_string())
            .one(&self.db)
            .await?;
        match existing {
            Some(model) => {
                let mut active: KvActive = model.into();
                active.value = ActiveValue::Set(value.to_string());
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let active = KvActive {
                    key: ActiveValue::Set(key.to_string()),
                    value: ActiveValue::Set(value.to_string()),
                    updated_at: ActiveValue::Set(now),
                };
                active.insert(&self.db).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CursorStore for StateStorage {
    async fn load_cursor(&self) -> Option<u64> {
        match self.load_value(CURSOR_KEY).await {
            Ok(value) => value.and_then(|raw| raw.parse().ok()),
            Err(error) => {
                tracing::warn!(error = %error, "failed to load rotation cursor");
                None
            }
        }
    }

    async fn store_cursor(&self, index: u64) -> Result<(), CursorStoreError> {
        self.store_value(CURSOR_KEY, &index.to_string())
            .await
            .map_err(|error| CursorStoreError(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> StateStorage {
        let storage = StateStorage::connect("sqlite::memory:").await.unwrap();
        storage.sync().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn each_connect_opens_its_own_database() {
        let first = storage().await;
        let second = storage().await;
        first.store_cursor(5).await.unwrap();
        assert_eq!(second.load_cursor().await, None);
        assert_eq!(first.load_cursor().await, Some(5));
    }

    #[tokio::test]
    async fn cursor_round_trips_through_kv_state() {
        let storage = storage().await;
        assert_eq!(storage.load_cursor().await, None);
        storage.store_cursor(3).await.unwrap();
        assert_eq!(storage.load_cursor().await, Some(3));
        storage.store_cursor(0).await.unwrap();
        assert_eq!(storage.load_cursor().await, Some(0));
    }

    #[tokio::test]
    async fn unparsable_cursor_reads_as_absent() {
        let storage = storage().await;
        storage.store_value(CURSOR_KEY, "not a number").await.unwrap();
        assert_eq!(storage.load_cursor().await, None);
    }
}
