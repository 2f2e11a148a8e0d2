use conversations::StoreError;
use llm::GenerationError;
use thiserror::Error;

/// Ошибки обработки одной записи. `Display` пишется в поле `error` записи.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Failed to generate summary")]
    EmptySummary,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Completion for conversation {0} was not persisted")]
    CompletionNotPersisted(String),
}

impl ProcessorError {
    /// Повторная попытка может пройти (сбой хранилища, сеть, 5xx/429).
    /// Пустое резюме и битый ответ модели повторять бессмысленно.
    pub fn is_transient(&self) -> bool {
        match self {
            ProcessorError::Store(_) => true,
            ProcessorError::Generation(e) => e.is_transient(),
            ProcessorError::EmptySummary | ProcessorError::CompletionNotPersisted(_) => false,
        }
    }
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let server = ProcessorError::Generation(GenerationError::Api {
            status: 503,
            body: "overloaded".to_string(),
        });
        let malformed = ProcessorError::Generation(GenerationError::MalformedOutput(
            "not a list".to_string(),
        ));
        let store = ProcessorError::Store(StoreError::Unavailable("locked".to_string()));

        assert!(server.is_transient());
        assert!(store.is_transient());
        assert!(!malformed.is_transient());
        assert!(!ProcessorError::EmptySummary.is_transient());
        assert!(!ProcessorError::CompletionNotPersisted("c1".to_string()).is_transient());
    }
}
