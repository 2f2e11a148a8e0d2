//! Обработка одной записи: claim → summary → keywords → phrases → completed.
//!
//! Каждый переход статуса сразу пишется в хранилище. Любая ошибка после
//! claim переводит запись в `failed` с текстом ошибки.

use crate::error::{ProcessorError, ProcessorResult};
use crate::fallback::{normalize, FALLBACK_KEYWORDS, FALLBACK_PHRASES};
use chrono::{DateTime, Utc};
use common::OperationTimer;
use conversations::{ConversationRecord, ConversationStatus, ConversationStore, RecordUpdate};
use llm::{ChatMessage, GenerationClient};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Результат успешного обогащения записи
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentResult {
    pub conversation_id: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub phrases: Vec<String>,
    pub processed_at: DateTime<Utc>,
    pub model_identity: String,
    pub keywords_fallback: bool,
    pub phrases_fallback: bool,
}

/// Чем закончилась попытка обработать запись
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed(EnrichmentResult),
    /// Записи с таким id нет
    NotFound,
    /// Запись есть, но на момент claim уже не `pending`
    AlreadyClaimed,
    /// Генерация не дала резюме; запись помечена `failed`
    ValidationFailed(String),
    /// Сбой, который может пройти при повторе (хранилище, сеть, 5xx);
    /// запись помечена `failed`, если удалось
    TransientFailure(String),
    /// Повтор не поможет: битый ответ модели или потерянный claim
    PermanentFailure(String),
}

impl ProcessOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ProcessOutcome::Completed(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProcessOutcome::ValidationFailed(_)
                | ProcessOutcome::TransientFailure(_)
                | ProcessOutcome::PermanentFailure(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Completed(_) => "completed",
            ProcessOutcome::NotFound => "not_found",
            ProcessOutcome::AlreadyClaimed => "already_claimed",
            ProcessOutcome::ValidationFailed(_) => "validation_failed",
            ProcessOutcome::TransientFailure(_) => "transient_failure",
            ProcessOutcome::PermanentFailure(_) => "permanent_failure",
        }
    }
}

pub struct ConversationProcessor {
    store: Arc<dyn ConversationStore>,
    generator: Arc<dyn GenerationClient>,
}

impl ConversationProcessor {
    pub fn new(store: Arc<dyn ConversationStore>, generator: Arc<dyn GenerationClient>) -> Self {
        Self { store, generator }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn generator(&self) -> &Arc<dyn GenerationClient> {
        &self.generator
    }

    /// Найти запись по id и обработать её
    pub async fn process_by_id(&self, id: &str) -> ProcessOutcome {
        match self.store.fetch_by_id(id).await {
            Ok(Some(record)) => self.process(&record).await,
            Ok(None) => {
                warn!(conversation_id = %id, "Conversation not found");
                ProcessOutcome::NotFound
            }
            Err(e) => {
                error!(conversation_id = %id, error = %e, "Failed to load conversation");
                ProcessOutcome::TransientFailure(e.to_string())
            }
        }
    }

    /// Провести запись через весь жизненный цикл
    pub async fn process(&self, record: &ConversationRecord) -> ProcessOutcome {
        let id = record.id.as_str();

        match self.store.claim(id).await {
            Ok(true) => debug!(conversation_id = %id, "Claimed conversation"),
            Ok(false) => return self.explain_missed_claim(id).await,
            Err(e) => {
                error!(conversation_id = %id, error = %e, "Claim failed");
                return ProcessOutcome::TransientFailure(e.to_string());
            }
        }

        info!(conversation_id = %id, messages = record.history.len(), "Processing conversation");

        let mut timer = OperationTimer::new("process_conversation");
        timer.add_field("conversation_id", id);

        let result = self.enrich(record).await;
        timer.finish_with_result(&result);

        match result {
            Ok(enrichment) => {
                info!(
                    conversation_id = %id,
                    keywords_fallback = enrichment.keywords_fallback,
                    phrases_fallback = enrichment.phrases_fallback,
                    "Conversation completed"
                );
                ProcessOutcome::Completed(enrichment)
            }
            Err(e) => {
                self.mark_failed(id, &e).await;
                let message = e.to_string();
                match e {
                    ProcessorError::EmptySummary => ProcessOutcome::ValidationFailed(message),
                    e if e.is_transient() => ProcessOutcome::TransientFailure(message),
                    _ => ProcessOutcome::PermanentFailure(message),
                }
            }
        }
    }

    async fn explain_missed_claim(&self, id: &str) -> ProcessOutcome {
        match self.store.status_of(id).await {
            Ok(Some(status)) => {
                info!(conversation_id = %id, status = %status, "Conversation is not pending, skipping");
                ProcessOutcome::AlreadyClaimed
            }
            Ok(None) => {
                warn!(conversation_id = %id, "Conversation disappeared before claim");
                ProcessOutcome::NotFound
            }
            Err(e) => ProcessOutcome::TransientFailure(e.to_string()),
        }
    }

    /// Шаги генерации после claim; запись в `completed` входит сюда же
    async fn enrich(&self, record: &ConversationRecord) -> ProcessorResult<EnrichmentResult> {
        let history: Vec<ChatMessage> = record
            .history
            .iter()
            .map(|entry| ChatMessage::new(&entry.role, &entry.content))
            .collect();

        let summary = self.generator.summarize(&history).await?;
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(ProcessorError::EmptySummary);
        }

        let generated_keywords = self.generator.extract_keywords(&summary).await?;
        let generated_count = generated_keywords.len();
        let keywords = normalize(generated_keywords, &FALLBACK_KEYWORDS);
        if keywords.used_fallback {
            warn!(
                conversation_id = %record.id,
                generated = generated_count,
                "Too few keywords generated, using fallback list"
            );
        }

        let generated_phrases = self.generator.generate_phrases(&keywords.items).await?;
        let generated_count = generated_phrases.len();
        let phrases = normalize(generated_phrases, &FALLBACK_PHRASES);
        if phrases.used_fallback {
            warn!(
                conversation_id = %record.id,
                generated = generated_count,
                "Too few phrases generated, using fallback list"
            );
        }

        let enrichment = EnrichmentResult {
            conversation_id: record.id.clone(),
            summary,
            keywords: keywords.items,
            phrases: phrases.items,
            processed_at: Utc::now(),
            model_identity: self.generator.model_identity(),
            keywords_fallback: keywords.used_fallback,
            phrases_fallback: phrases.used_fallback,
        };

        let update = RecordUpdate {
            summary: Some(enrichment.summary.clone()),
            keywords: Some(enrichment.keywords.clone()),
            phrases: Some(enrichment.phrases.clone()),
            processed_at: Some(enrichment.processed_at),
            model_identity: Some(enrichment.model_identity.clone()),
            error: None,
        };

        let persisted = self
            .store
            .update_status(&record.id, ConversationStatus::Completed, update)
            .await?;
        if !persisted {
            return Err(ProcessorError::CompletionNotPersisted(record.id.clone()));
        }

        Ok(enrichment)
    }

    async fn mark_failed(&self, id: &str, failure: &ProcessorError) {
        let message = failure.to_string();
        warn!(conversation_id = %id, error = %message, "Marking conversation as failed");

        match self
            .store
            .update_status(id, ConversationStatus::Failed, RecordUpdate::failure(message))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(
                conversation_id = %id,
                "Conversation left processing before failure was recorded"
            ),
            Err(e) => error!(
                conversation_id = %id,
                error = %e,
                "Could not record failure, conversation stays in processing"
            ),
        }
    }
}
