pub mod config;
pub mod structured_logging;

pub use config::{
    ConfigError, ConfigResult, GenerationConfig, LogSettings, MonitorConfig, ProcessorConfig,
    StoreConfig,
};

pub use structured_logging::{
    init_structured_logging, ExecutionContext, LoggingConfig, OperationTimer, StructuredLogEntry,
};
