use crate::error::{StoreError, StoreResult};
use crate::store::ConversationStore;
use crate::types::*;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

type DbPool = Pool<SqliteConnectionManager>;

const SELECT_COLUMNS: &str = "id, history, status, summary, keywords, phrases, error,
     processed_at, model_identity, created_at, updated_at";

/// SQLite хранилище диалогов поверх пула соединений
pub struct SqliteConversationStore {
    pool: Arc<DbPool>,
}

impl SqliteConversationStore {
    pub async fn new<P: AsRef<Path>>(path: P, pool_size: u32) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref())
            .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder().max_size(pool_size).build(manager)?;

        // Инициализируем схему
        {
            let conn = pool.get()?;
            Self::init_schema(&conn)?;
        }

        info!("Opened conversation store at {}", path.as_ref().display());

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                history TEXT NOT NULL,
                status TEXT NOT NULL,
                summary TEXT,
                keywords TEXT,
                phrases TEXT,
                error TEXT,
                processed_at TEXT,
                model_identity TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_status
                ON conversations(status, created_at ASC);
            "#,
        )?;
        Ok(())
    }

    /// Пометить нечитаемую `pending` запись как `failed`, чтобы она не
    /// всплывала в каждом цикле
    fn fail_unreadable(conn: &Connection, id: &str, cause: &StoreError) -> StoreResult<()> {
        conn.execute(
            "UPDATE conversations SET
                status = ?1,
                error = ?2,
                updated_at = ?3,
                summary = NULL,
                keywords = NULL,
                phrases = NULL,
                processed_at = NULL,
                model_identity = NULL
             WHERE id = ?4 AND status = ?5",
            params![
                ConversationStatus::Failed.as_str(),
                format!("Unreadable record: {}", cause),
                timestamp(&Utc::now()),
                id,
                ConversationStatus::Pending.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Выполнить блокирующую работу с соединением вне async runtime
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Строка таблицы как есть, до разбора JSON и дат
struct RawRow {
    id: String,
    history: String,
    status: String,
    summary: Option<String>,
    keywords: Option<String>,
    phrases: Option<String>,
    error: Option<String>,
    processed_at: Option<String>,
    model_identity: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            history: row.get(1)?,
            status: row.get(2)?,
            summary: row.get(3)?,
            keywords: row.get(4)?,
            phrases: row.get(5)?,
            error: row.get(6)?,
            processed_at: row.get(7)?,
            model_identity: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_record(self) -> StoreResult<ConversationRecord> {
        let parse_ts = |value: &str| -> StoreResult<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(value)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| StoreError::InvalidRecord {
                    id: self.id.clone(),
                    reason: format!("bad timestamp '{}': {}", value, e),
                })
        };

        let processed_at = self.processed_at.as_deref().map(parse_ts).transpose()?;
        let created_at = parse_ts(&self.created_at)?;
        let updated_at = parse_ts(&self.updated_at)?;

        Ok(ConversationRecord {
            history: serde_json::from_str(&self.history)?,
            status: self.status.parse()?,
            keywords: self.keywords.as_deref().map(serde_json::from_str).transpose()?,
            phrases: self.phrases.as_deref().map(serde_json::from_str).transpose()?,
            summary: self.summary,
            error: self.error,
            processed_at,
            model_identity: self.model_identity,
            created_at,
            updated_at,
            id: self.id,
        })
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    #[instrument(skip(self))]
    async fn fetch_pending(&self) -> StoreResult<Vec<ConversationRecord>> {
        let records: Vec<ConversationRecord> = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM conversations WHERE status = ?1 ORDER BY created_at ASC",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![ConversationStatus::Pending.as_str()], RawRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                // Битая строка не должна блокировать остальные
                let mut records = Vec::with_capacity(rows.len());
                for raw in rows {
                    let id = raw.id.clone();
                    match raw.into_record() {
                        Ok(record) => records.push(record),
                        Err(e) => {
                            warn!(conversation_id = %id, error = %e, "Skipping unreadable conversation");
                            Self::fail_unreadable(conn, &id, &e)?;
                        }
                    }
                }
                Ok(records)
            })
            .await?;

        debug!("Found {} pending conversations", records.len());
        Ok(records)
    }

    async fn fetch_by_id(&self, id: &str) -> StoreResult<Option<ConversationRecord>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {} FROM conversations WHERE id = ?1", SELECT_COLUMNS),
                    params![id],
                    RawRow::from_row,
                )
                .optional()?;
            raw.map(RawRow::into_record).transpose()
        })
        .await
    }

    async fn update_status(
        &self,
        id: &str,
        status: ConversationStatus,
        update: RecordUpdate,
    ) -> StoreResult<bool> {
        let keywords = update.keywords.as_ref().map(serde_json::to_string).transpose()?;
        let phrases = update.phrases.as_ref().map(serde_json::to_string).transpose()?;
        let processed_at = update.processed_at.as_ref().map(timestamp);

        // Разрешённые исходные статусы: константы из `as_str`, не ввод
        let allowed = status
            .predecessors()
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        if allowed.is_empty() {
            warn!(conversation_id = %id, status = %status, "No status can transition to target");
            return Ok(false);
        }
        let failing = status == ConversationStatus::Failed;
        let completing = status == ConversationStatus::Completed;
        let owned_id = id.to_string();

        let modified = self
            .with_conn(move |conn| {
                // COALESCE: незаданные поля сохраняют прежнее значение,
                // кроме тех, что переход стирает
                let sql = format!(
                    "UPDATE conversations SET
                        status = ?1,
                        updated_at = ?2,
                        summary = CASE WHEN ?9 THEN ?3 ELSE COALESCE(?3, summary) END,
                        keywords = CASE WHEN ?9 THEN ?4 ELSE COALESCE(?4, keywords) END,
                        phrases = CASE WHEN ?9 THEN ?5 ELSE COALESCE(?5, phrases) END,
                        error = CASE WHEN ?10 THEN ?6 ELSE COALESCE(?6, error) END,
                        processed_at = CASE WHEN ?9 THEN ?7 ELSE COALESCE(?7, processed_at) END,
                        model_identity = CASE WHEN ?9 THEN ?8 ELSE COALESCE(?8, model_identity) END
                     WHERE id = ?11 AND status IN ({})",
                    allowed
                );
                let changed = conn.execute(
                    &sql,
                    params![
                        status.as_str(),
                        timestamp(&Utc::now()),
                        update.summary,
                        keywords,
                        phrases,
                        update.error,
                        processed_at,
                        update.model_identity,
                        failing,
                        completing,
                        owned_id,
                    ],
                )?;
                Ok(changed)
            })
            .await?;

        if modified > 0 {
            info!("Updated conversation {} status to {}", id, status);
            Ok(true)
        } else {
            warn!(
                conversation_id = %id,
                status = %status,
                "Conversation not found or not eligible for status change"
            );
            Ok(false)
        }
    }

    async fn claim(&self, id: &str) -> StoreResult<bool> {
        let owned_id = id.to_string();
        let changed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "UPDATE conversations SET status = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = ?4",
                    params![
                        ConversationStatus::Processing.as_str(),
                        timestamp(&Utc::now()),
                        owned_id,
                        ConversationStatus::Pending.as_str(),
                    ],
                )?)
            })
            .await?;

        debug!(conversation_id = %id, claimed = changed > 0, "Claim attempt");
        Ok(changed > 0)
    }

    async fn requeue(&self, id: &str) -> StoreResult<bool> {
        let owned_id = id.to_string();
        let changed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "UPDATE conversations SET status = ?1, error = NULL, updated_at = ?2
                     WHERE id = ?3 AND status IN (?4, ?5)",
                    params![
                        ConversationStatus::Pending.as_str(),
                        timestamp(&Utc::now()),
                        owned_id,
                        ConversationStatus::Processing.as_str(),
                        ConversationStatus::Failed.as_str(),
                    ],
                )?)
            })
            .await?;

        if changed > 0 {
            info!("Requeued conversation {}", id);
        }
        Ok(changed > 0)
    }

    async fn insert(&self, record: ConversationRecord) -> StoreResult<()> {
        let history = serde_json::to_string(&record.history)?;
        let keywords = record.keywords.as_ref().map(serde_json::to_string).transpose()?;
        let phrases = record.phrases.as_ref().map(serde_json::to_string).transpose()?;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO conversations (
                    id, history, status, summary, keywords, phrases, error,
                    processed_at, model_identity, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id,
                    history,
                    record.status.as_str(),
                    record.summary,
                    keywords,
                    phrases,
                    record.error,
                    record.processed_at.as_ref().map(timestamp),
                    record.model_identity,
                    timestamp(&record.created_at),
                    timestamp(&record.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn status_of(&self, id: &str) -> StoreResult<Option<ConversationStatus>> {
        let id = id.to_string();
        let status: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT status FROM conversations WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        status.map(|s| s.parse()).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, SqliteConversationStore) {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let store = SqliteConversationStore::new(temp_dir.path().join("test.db"), 2)
            .await
            .expect("failed to open store");
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_corrupt_status_is_reported() {
        let (_dir, store) = open_store().await;
        store
            .insert(ConversationRecord::new_pending("c1", vec![]))
            .await
            .unwrap();

        store
            .with_conn(|conn| {
                conn.execute("UPDATE conversations SET status = 'archived'", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let err = store.fetch_by_id("c1").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidStatus(s) if s == "archived"));
    }

    #[tokio::test]
    async fn test_unreadable_row_does_not_block_pending_fetch() {
        let (_dir, store) = open_store().await;
        for id in ["good", "bad"] {
            store
                .insert(ConversationRecord::new_pending(
                    id,
                    vec![MessageEntry::new("user", "hello")],
                ))
                .await
                .unwrap();
        }

        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE conversations SET history = 'not json' WHERE id = 'bad'",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let pending = store.fetch_pending().await.unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["good"]);

        assert_eq!(
            store.status_of("bad").await.unwrap(),
            Some(ConversationStatus::Failed)
        );
        // Повторная выборка её уже не видит
        assert_eq!(store.fetch_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timestamps_sort_lexicographically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(1);
        assert!(timestamp(&earlier) < timestamp(&later));
    }
}
