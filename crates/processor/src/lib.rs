//! Обогащение диалогов: конвейер одной записи и цикл мониторинга.

pub mod error;
pub mod fallback;
pub mod monitor;
pub mod pipeline;

pub use error::{ProcessorError, ProcessorResult};
pub use fallback::{
    normalize, Normalized, FALLBACK_KEYWORDS, FALLBACK_PHRASES, MIN_GENERATED_ITEMS,
};
pub use monitor::{backoff_delay, MonitorExit, MonitorLoop, MonitorSettings, MonitorStats};
pub use pipeline::{ConversationProcessor, EnrichmentResult, ProcessOutcome};
