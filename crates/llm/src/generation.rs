//! Контракт сервиса генерации и его реализация поверх `LlmClient`.
//!
//! Ретраев здесь нет: политика повторов живёт у вызывающей стороны.
//! Конкретный клиент деградирует мягко: сбой суммаризации даёт пустую строку,
//! сбой извлечения списков даёт пустой список.

use crate::parsing::{parse_list_output, ListKind, MAX_LIST_ITEMS};
use crate::{ChatMessage, CompletionRequest, GenerationResult, LlmClient};
use async_trait::async_trait;
use tracing::{info, warn};

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Краткое резюме диалога; пустая строка, если сгенерировать не удалось
    async fn summarize(&self, history: &[ChatMessage]) -> GenerationResult<String>;

    /// До десяти ключевых слов по резюме
    async fn extract_keywords(&self, summary: &str) -> GenerationResult<Vec<String>>;

    /// До десяти фраз по ключевым словам
    async fn generate_phrases(&self, keywords: &[String]) -> GenerationResult<Vec<String>>;

    /// Проба доступности, вызывается один раз перед запуском цикла
    async fn check_availability(&self) -> bool;

    /// Метка модели, записываемая вместе с результатом
    fn model_identity(&self) -> String;
}

const SUMMARY_SYSTEM_PROMPT: &str =
    "You analyze support conversations and describe the person's situation accurately and briefly.";

pub struct LlmGenerationClient {
    llm: LlmClient,
}

impl LlmGenerationClient {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    fn summary_prompt(history: &[ChatMessage]) -> String {
        let transcript = history
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"Summarize the following conversation in 2-4 sentences. Focus on the person's needs, pain points and context. Respond with the summary only.

CONVERSATION:
{transcript}"#
        )
    }

    fn keywords_prompt(summary: &str) -> String {
        format!(
            r#"Based on the summary below, list exactly {MAX_LIST_ITEMS} keywords or short search phrases this person would use when looking for help online.

SUMMARY:
{summary}

Answer ONLY with a JSON array of strings, for example:
["need support", "looking for advice"]"#
        )
    }

    fn phrases_prompt(keywords: &[String]) -> String {
        format!(
            r#"Using these keywords: {}

Write exactly {MAX_LIST_ITEMS} short, natural first-person phrases someone might post in an online community when asking for help.

Answer ONLY with a JSON array of strings."#,
            keywords.join(", ")
        )
    }
}

#[async_trait]
impl GenerationClient for LlmGenerationClient {
    async fn summarize(&self, history: &[ChatMessage]) -> GenerationResult<String> {
        if history.is_empty() {
            warn!("Conversation history is empty, nothing to summarize");
            return Ok(String::new());
        }

        let request = CompletionRequest::new(&Self::summary_prompt(history))
            .system_prompt(SUMMARY_SYSTEM_PROMPT);

        match self.llm.complete(request).await {
            Ok(summary) => {
                let summary = summary.trim().to_string();
                info!("Generated summary ({} chars)", summary.len());
                Ok(summary)
            }
            Err(e) => {
                warn!("Summary generation failed: {}", e);
                Ok(String::new())
            }
        }
    }

    async fn extract_keywords(&self, summary: &str) -> GenerationResult<Vec<String>> {
        let request = CompletionRequest::new(&Self::keywords_prompt(summary));

        match self.llm.complete(request).await {
            Ok(response) => Ok(parse_list_output(&response, ListKind::Keywords)),
            Err(e) => {
                warn!("Keyword extraction failed: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn generate_phrases(&self, keywords: &[String]) -> GenerationResult<Vec<String>> {
        let request = CompletionRequest::new(&Self::phrases_prompt(keywords)).temperature(0.7);

        match self.llm.complete(request).await {
            Ok(response) => Ok(parse_list_output(&response, ListKind::Phrases)),
            Err(e) => {
                warn!("Phrase generation failed: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn check_availability(&self) -> bool {
        self.llm.health_check().await
    }

    fn model_identity(&self) -> String {
        self.llm.model().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_prompt_contains_transcript() {
        let history = vec![
            ChatMessage::user("My mother was just diagnosed"),
            ChatMessage::assistant("I'm sorry to hear that"),
        ];
        let prompt = LlmGenerationClient::summary_prompt(&history);

        assert!(prompt.contains("user: My mother was just diagnosed"));
        assert!(prompt.contains("assistant: I'm sorry to hear that"));
    }

    #[test]
    fn test_phrases_prompt_lists_keywords() {
        let keywords = vec!["caregiver".to_string(), "burnout".to_string()];
        let prompt = LlmGenerationClient::phrases_prompt(&keywords);

        assert!(prompt.contains("caregiver, burnout"));
        assert!(prompt.contains("exactly 10"));
    }

    #[tokio::test]
    async fn test_empty_history_skips_request() {
        // Сервер недоступен: если бы запрос ушёл, получили бы ошибку транспорта
        let llm = LlmClient::new(
            "http://127.0.0.1:9",
            "test-model",
            100,
            0.3,
            std::time::Duration::from_secs(1),
        )
        .unwrap();
        let client = LlmGenerationClient::new(llm);

        assert_eq!(client.summarize(&[]).await.unwrap(), "");
        assert_eq!(client.model_identity(), "test-model");
    }
}
