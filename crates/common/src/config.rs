//! Конфигурация процессора.
//!
//! Порядок применения: значения по умолчанию → TOML файл (если указан) →
//! переменные окружения (`.env` подхватывается через `dotenv`). Флаги CLI
//! накладываются поверх уже в бинарнике.

use crate::structured_logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    pub pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("conversations.db"),
            pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Базовый URL OpenAI-совместимого сервера (LM Studio и т.п.)
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234".to_string(),
            model: "itlwas/hermes-3-llama-3.1-8b".to_string(),
            timeout_secs: 60,
            max_tokens: 500,
            temperature: 0.3,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_secs: u64,
    /// Пауза между записями внутри одного цикла
    pub record_pause_secs: u64,
    pub max_backoff_secs: u64,
    pub max_consecutive_errors: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            record_pause_secs: 2,
            max_backoff_secs: 60,
            max_consecutive_errors: 5,
        }
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn record_pause(&self) -> Duration {
        Duration::from_secs(self.record_pause_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl LogSettings {
    pub fn to_logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.level.parse().unwrap_or(tracing::Level::INFO),
            json_output: self.json,
            log_file: self.file.clone(),
            ..LoggingConfig::default()
        }
    }
}

/// Полная конфигурация, передаваемая компонентам при создании
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub store: StoreConfig,
    pub generation: GenerationConfig,
    pub monitor: MonitorConfig,
    pub logging: LogSettings,
}

impl ProcessorConfig {
    /// Загрузить конфигурацию: файл (опционально) + окружение, затем валидация
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        dotenv::dotenv().ok(); // Загружаем .env если есть

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    /// Наложить переменные окружения. `lookup` вынесен параметром, чтобы
    /// тесты не трогали глобальное окружение процесса.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ENRICHER_DATABASE_PATH") {
            self.store.database_path = PathBuf::from(path);
        }
        if let Some(size) = lookup("ENRICHER_POOL_SIZE") {
            self.store.pool_size = parse_env("ENRICHER_POOL_SIZE", &size)?;
        }
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.generation.base_url = url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.generation.model = model;
        }
        if let Some(timeout) = lookup("LLM_TIMEOUT_SECS") {
            self.generation.timeout_secs = parse_env("LLM_TIMEOUT_SECS", &timeout)?;
        }
        if let Some(interval) = lookup("ENRICHER_CHECK_INTERVAL") {
            self.monitor.check_interval_secs = parse_env("ENRICHER_CHECK_INTERVAL", &interval)?;
        }
        if let Some(level) = lookup("ENRICHER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(file) = lookup("ENRICHER_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.store.pool_size == 0 {
            return Err(invalid("store.pool_size", "must be greater than zero"));
        }
        if self.generation.base_url.trim().is_empty() {
            return Err(invalid("generation.base_url", "must not be empty"));
        }
        if self.generation.model.trim().is_empty() {
            return Err(invalid("generation.model", "must not be empty"));
        }
        if self.generation.timeout_secs == 0 {
            return Err(invalid("generation.timeout_secs", "must be greater than zero"));
        }
        if self.monitor.check_interval_secs == 0 {
            return Err(invalid("monitor.check_interval_secs", "must be greater than zero"));
        }
        if self.monitor.max_consecutive_errors == 0 {
            return Err(invalid(
                "monitor.max_consecutive_errors",
                "must be greater than zero",
            ));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(invalid("logging.level", "unknown log level"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        field: key.to_string(),
        reason: format!("cannot parse '{}'", value),
    })
}
