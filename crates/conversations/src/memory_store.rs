use crate::error::{StoreError, StoreResult};
use crate::store::ConversationStore;
use crate::types::*;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

/// Хранилище в памяти: тесты, демо, локальные прогоны.
///
/// `fail_updates_to` имитирует сбой записи заданного статуса.
#[derive(Default)]
pub struct InMemoryConversationStore {
    records: Mutex<Vec<ConversationRecord>>,
    failing_status: Mutex<Option<ConversationStatus>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ConversationRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn fail_updates_to(&self, status: Option<ConversationStatus>) {
        *self.failing_status.lock() = status;
    }

    pub fn get(&self, id: &str) -> Option<ConversationRecord> {
        self.records.lock().iter().find(|r| r.id == id).cloned()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn fetch_pending(&self) -> StoreResult<Vec<ConversationRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.status == ConversationStatus::Pending)
            .cloned()
            .collect())
    }

    async fn fetch_by_id(&self, id: &str) -> StoreResult<Option<ConversationRecord>> {
        Ok(self.get(id))
    }

    async fn update_status(
        &self,
        id: &str,
        status: ConversationStatus,
        update: RecordUpdate,
    ) -> StoreResult<bool> {
        if *self.failing_status.lock() == Some(status) {
            return Err(StoreError::Unavailable(format!(
                "simulated write failure for status {}",
                status
            )));
        }

        let mut records = self.records.lock();
        match records
            .iter_mut()
            .find(|r| r.id == id && r.status.can_transition_to(status))
        {
            Some(record) => {
                update.apply_transition(status, record);
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn claim(&self, id: &str) -> StoreResult<bool> {
        let mut records = self.records.lock();
        match records
            .iter_mut()
            .find(|r| r.id == id && r.status == ConversationStatus::Pending)
        {
            Some(record) => {
                record.status = ConversationStatus::Processing;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn requeue(&self, id: &str) -> StoreResult<bool> {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| {
            r.id == id
                && matches!(
                    r.status,
                    ConversationStatus::Processing | ConversationStatus::Failed
                )
        }) {
            Some(record) => {
                record.status = ConversationStatus::Pending;
                record.error = None;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert(&self, record: ConversationRecord) -> StoreResult<()> {
        let mut records = self.records.lock();
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::InvalidRecord {
                id: record.id,
                reason: "duplicate id".to_string(),
            });
        }
        records.push(record);
        Ok(())
    }
}
