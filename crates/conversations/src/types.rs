use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Число ключевых слов и фраз в завершённой записи
pub const ENRICHMENT_SIZE: usize = 10;

/// Состояние записи в жизненном цикле
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Ожидает обработки (создаётся внешней системой)
    Pending,
    /// Захвачена процессором
    Processing,
    Completed,
    Failed,
}

impl ConversationStatus {
    pub const ALL: [ConversationStatus; 4] = [
        ConversationStatus::Pending,
        ConversationStatus::Processing,
        ConversationStatus::Completed,
        ConversationStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Pending => "pending",
            ConversationStatus::Processing => "processing",
            ConversationStatus::Completed => "completed",
            ConversationStatus::Failed => "failed",
        }
    }

    /// Разрешён ли переход процессором: только вперёд
    pub fn can_transition_to(&self, next: ConversationStatus) -> bool {
        matches!(
            (self, next),
            (ConversationStatus::Pending, ConversationStatus::Processing)
                | (ConversationStatus::Processing, ConversationStatus::Completed)
                | (ConversationStatus::Processing, ConversationStatus::Failed)
        )
    }

    /// Статусы, из которых `update_status` может перевести запись в `self`
    pub fn predecessors(self) -> Vec<ConversationStatus> {
        Self::ALL
            .into_iter()
            .filter(|status| status.can_transition_to(self))
            .collect()
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConversationStatus::Pending),
            "processing" => Ok(ConversationStatus::Processing),
            "completed" => Ok(ConversationStatus::Completed),
            "failed" => Ok(ConversationStatus::Failed),
            _ => Err(StoreError::InvalidStatus(s.to_string())),
        }
    }
}

/// Одно сообщение истории диалога
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub role: String,
    #[serde(alias = "text")]
    pub content: String,
}

impl MessageEntry {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub history: Vec<MessageEntry>,
    pub status: ConversationStatus,

    // Результаты обогащения
    pub summary: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub phrases: Option<Vec<String>>,
    pub error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub model_identity: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    /// Новая запись в состоянии `pending`
    pub fn new_pending(id: impl Into<String>, history: Vec<MessageEntry>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            history,
            status: ConversationStatus::Pending,
            summary: None,
            keywords: None,
            phrases: None,
            error: None,
            processed_at: None,
            model_identity: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Частичное обновление полей записи вместе со сменой статуса.
/// `None` означает "не трогать поле".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub summary: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub phrases: Option<Vec<String>>,
    pub error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub model_identity: Option<String>,
}

impl RecordUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Перевести запись в `status` и слить поля.
    ///
    /// `failed` стирает результаты обогащения, `completed` стирает `error`:
    /// терминальная запись не несёт следов предыдущей попытки.
    pub fn apply_transition(&self, status: ConversationStatus, record: &mut ConversationRecord) {
        record.status = status;
        match status {
            ConversationStatus::Failed => {
                record.summary = None;
                record.keywords = None;
                record.phrases = None;
                record.processed_at = None;
                record.model_identity = None;
            }
            ConversationStatus::Completed => record.error = None,
            _ => {}
        }

        if let Some(summary) = &self.summary {
            record.summary = Some(summary.clone());
        }
        if let Some(keywords) = &self.keywords {
            record.keywords = Some(keywords.clone());
        }
        if let Some(phrases) = &self.phrases {
            record.phrases = Some(phrases.clone());
        }
        if let Some(error) = &self.error {
            record.error = Some(error.clone());
        }
        if let Some(processed_at) = self.processed_at {
            record.processed_at = Some(processed_at);
        }
        if let Some(model) = &self.model_identity {
            record.model_identity = Some(model.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_strings() {
        for status in [
            ConversationStatus::Pending,
            ConversationStatus::Processing,
            ConversationStatus::Completed,
            ConversationStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ConversationStatus>().unwrap(), status);
        }
        assert!("done".parse::<ConversationStatus>().is_err());
    }

    #[test]
    fn test_transitions_only_forward() {
        use ConversationStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Processing));
    }

    #[test]
    fn test_predecessors() {
        use ConversationStatus::*;

        assert_eq!(Completed.predecessors(), vec![Processing]);
        assert_eq!(Failed.predecessors(), vec![Processing]);
        assert_eq!(Processing.predecessors(), vec![Pending]);
        assert!(Pending.predecessors().is_empty());
    }

    #[test]
    fn test_message_entry_accepts_text_alias() {
        let entry: MessageEntry =
            serde_json::from_str(r#"{"role": "user", "text": "hello"}"#).unwrap();
        assert_eq!(entry, MessageEntry::new("user", "hello"));
    }

    #[test]
    fn test_failure_clears_enrichment_fields() {
        let mut record = ConversationRecord::new_pending("c1", vec![]);
        record.summary = Some("stale".to_string());
        record.keywords = Some(vec!["old".to_string()]);
        record.model_identity = Some("model".to_string());

        RecordUpdate::failure("boom").apply_transition(ConversationStatus::Failed, &mut record);

        assert_eq!(record.status, ConversationStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(record.summary.is_none());
        assert!(record.keywords.is_none());
        assert!(record.model_identity.is_none());
    }

    #[test]
    fn test_completion_clears_error() {
        let mut record = ConversationRecord::new_pending("c1", vec![]);
        record.error = Some("previous attempt".to_string());

        let update = RecordUpdate {
            summary: Some("fresh".to_string()),
            ..RecordUpdate::default()
        };
        update.apply_transition(ConversationStatus::Completed, &mut record);

        assert!(record.error.is_none());
        assert_eq!(record.summary.as_deref(), Some("fresh"));
    }
}
