use crate::error::StoreResult;
use crate::types::{ConversationRecord, ConversationStatus, RecordUpdate};
use async_trait::async_trait;

/// Хранилище записей диалогов.
///
/// `bool` в ответах означает "запись найдена и изменена"; сбои самого
/// хранилища возвращаются как `Err`.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Все записи со статусом `pending`, порядок определяет хранилище.
    /// Записи, которые не удалось прочитать, пропускаются и не роняют выборку.
    async fn fetch_pending(&self) -> StoreResult<Vec<ConversationRecord>>;

    async fn fetch_by_id(&self, id: &str) -> StoreResult<Option<ConversationRecord>>;

    /// Атомарно выставить статус, `updated_at` и слить поля `update`.
    ///
    /// Срабатывает только для разрешённого перехода вперёд (см.
    /// `ConversationStatus::can_transition_to`): `completed`/`failed` пишутся
    /// лишь поверх `processing`. Переход в `failed` стирает результаты
    /// обогащения, переход в `completed` стирает `error`.
    /// `false`, если записи нет или её статус не допускает перехода.
    async fn update_status(
        &self,
        id: &str,
        status: ConversationStatus,
        update: RecordUpdate,
    ) -> StoreResult<bool>;

    /// Условный переход `pending -> processing` одной операцией.
    /// `false`, если запись отсутствует или уже не в `pending`.
    async fn claim(&self, id: &str) -> StoreResult<bool>;

    /// Вернуть `processing`/`failed` запись в `pending` (ручное восстановление)
    async fn requeue(&self, id: &str) -> StoreResult<bool>;

    async fn insert(&self, record: ConversationRecord) -> StoreResult<()>;

    async fn status_of(&self, id: &str) -> StoreResult<Option<ConversationStatus>> {
        Ok(self.fetch_by_id(id).await?.map(|record| record.status))
    }
}
