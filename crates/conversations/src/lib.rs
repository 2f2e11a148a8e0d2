//! Записи диалогов и хранилища для них.

pub mod error;
pub mod memory_store;
pub mod sqlite_store;
pub mod store;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use memory_store::InMemoryConversationStore;
pub use sqlite_store::SqliteConversationStore;
pub use store::ConversationStore;
pub use types::*;

/// Открыть SQLite хранилище по настройкам из конфигурации
pub async fn open_sqlite_store<P: AsRef<std::path::Path>>(
    db_path: P,
    pool_size: u32,
) -> StoreResult<SqliteConversationStore> {
    SqliteConversationStore::new(db_path, pool_size).await
}
