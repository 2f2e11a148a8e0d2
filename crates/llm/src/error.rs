use thiserror::Error;

/// Ошибки обращения к сервису генерации текста
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Empty response from model {0}")]
    EmptyResponse(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GenerationError {
    /// Временная ли это ошибка (сеть, таймаут, 5xx, 429)
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Transport(e) => e.is_timeout() || e.is_connect(),
            GenerationError::Api { status, .. } => *status == 429 || *status >= 500,
            GenerationError::EmptyResponse(_) => true,
            GenerationError::MalformedOutput(_) | GenerationError::Configuration(_) => false,
        }
    }
}

pub type GenerationResult<T> = Result<T, GenerationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_classification() {
        let rate_limited = GenerationError::Api {
            status: 429,
            body: "slow down".to_string(),
        };
        let server = GenerationError::Api {
            status: 503,
            body: "loading model".to_string(),
        };
        let bad_request = GenerationError::Api {
            status: 400,
            body: "bad".to_string(),
        };

        assert!(rate_limited.is_transient());
        assert!(server.is_transient());
        assert!(!bad_request.is_transient());
        assert!(!GenerationError::Configuration("x".into()).is_transient());
    }

    #[test]
    fn test_display_includes_status() {
        let err = GenerationError::Api {
            status: 500,
            body: "Internal Server Error".to_string(),
        };
        assert_eq!(err.to_string(), "LLM API error 500: Internal Server Error");
    }
}
