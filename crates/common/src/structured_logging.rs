use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// Структурированная запись лога в JSON формате
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredLogEntry {
    /// Временная метка в ISO 8601 формате
    pub timestamp: String,
    pub level: String,
    /// Целевой модуль/компонент
    pub target: String,
    pub message: String,
    /// Дополнительные поля (conversation_id, duration_ms, ...)
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ExecutionContext>,
}

/// Контекст процесса, прикладываемый к каждой JSON записи
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub app_version: String,
    pub hostname: String,
    pub pid: u32,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
        }
    }
}

/// Форматтер для JSON логов: одна запись на строку в stderr и, опционально, в файл.
/// stdout остаётся под результаты команд.
pub struct JsonFormatter {
    context: ExecutionContext,
    file: Option<Arc<Mutex<File>>>,
}

impl JsonFormatter {
    pub fn new(file: Option<Arc<Mutex<File>>>) -> Self {
        Self {
            context: ExecutionContext::default(),
            file,
        }
    }
}

impl<S> Layer<S> for JsonFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let level = match *event.metadata().level() {
            Level::ERROR => "ERROR",
            Level::WARN => "WARN",
            Level::INFO => "INFO",
            Level::DEBUG => "DEBUG",
            Level::TRACE => "TRACE",
        };

        let entry = StructuredLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            context: Some(self.context.clone()),
        };

        if let Ok(json) = serde_json::to_string(&entry) {
            let _ = writeln!(io::stderr(), "{}", json);
            if let Some(file) = &self.file {
                let _ = writeln!(file.lock(), "{}", json);
            }
        }
    }
}

/// Собирает поля события: `message` отдельно, остальное в карту
#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: HashMap<String, Value>,
}

impl JsonVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        match (field.name(), value) {
            ("message", Value::String(text)) => self.message = Some(text),
            (name, value) => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }
}

/// Конфигурация для structured logging
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Минимальный уровень логирования (перекрывается `RUST_LOG`)
    pub level: Level,
    /// Вывод в JSON формате
    pub json_output: bool,
    /// Цветной вывод (только для non-JSON)
    pub color_output: bool,
    /// Файл, в который дублируются логи
    pub log_file: Option<PathBuf>,
    pub include_line_numbers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_output: false,
            color_output: true,
            log_file: None,
            include_line_numbers: cfg!(debug_assertions),
        }
    }
}

fn open_log_file(path: &PathBuf) -> anyhow::Result<File> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(file)
}

/// Инициализировать structured logging
pub fn init_structured_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let file = match &config.log_file {
        Some(path) => Some(Arc::new(Mutex::new(open_log_file(path)?))),
        None => None,
    };

    if config.json_output {
        // JSON формат для production
        let subscriber = Registry::default()
            .with(env_filter)
            .with(JsonFormatter::new(file));

        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // Человекочитаемый формат для разработки
        let fmt_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_line_number(config.include_line_numbers)
            .with_ansi(config.color_output);

        let file_layer = file.map(|file| {
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(move || FileWriter(Arc::clone(&file)))
        });

        let subscriber = Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer);

        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Писатель для fmt слоя поверх общего файлового дескриптора
struct FileWriter(Arc<Mutex<File>>);

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

/// Вспомогательная структура для измерения времени операций
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
    fields: HashMap<String, Value>,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            operation_name: operation_name.into(),
            fields: HashMap::new(),
        }
    }

    pub fn add_field(&mut self, key: impl Into<String>, value: impl Serialize) {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Завершить замер и записать результат; возвращает длительность
    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: &Result<T, E>) -> Duration {
        let elapsed = self.start.elapsed();
        let duration_ms = elapsed.as_millis() as u64;

        match result {
            Ok(_) => {
                tracing::info!(
                    operation = %self.operation_name,
                    duration_ms = duration_ms,
                    success = true,
                    fields = ?self.fields,
                    "Operation completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    operation = %self.operation_name,
                    duration_ms = duration_ms,
                    success = false,
                    error = %e,
                    fields = ?self.fields,
                    "Operation failed"
                );
            }
        }

        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_log_entry_serialization() {
        let mut fields = HashMap::new();
        fields.insert("conversation_id".to_string(), Value::String("c1".into()));
        fields.insert("duration_ms".to_string(), Value::Number(42.into()));

        let entry = StructuredLogEntry {
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            level: "INFO".to_string(),
            target: "processor::pipeline".to_string(),
            message: "Conversation processed".to_string(),
            fields,
            context: Some(ExecutionContext::default()),
        };

        let json = serde_json::to_value(&entry).unwrap();
        // fields разворачиваются на верхний уровень
        assert_eq!(json["conversation_id"], "c1");
        assert_eq!(json["duration_ms"], 42);
        assert_eq!(json["level"], "INFO");
        assert!(json["context"]["pid"].is_number());
    }

    #[test]
    fn test_entry_without_context_skips_field() {
        let entry = StructuredLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: "WARN".to_string(),
            target: "test".to_string(),
            message: "no context".to_string(),
            fields: HashMap::new(),
            context: None,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("context").is_none());
        assert_eq!(json["message"], "no context");
    }

    #[test]
    fn test_operation_timer_reports_elapsed() {
        let mut timer = OperationTimer::new("process_conversation");
        timer.add_field("conversation_id", "c1");

        std::thread::sleep(Duration::from_millis(5));

        let result: Result<(), String> = Ok(());
        let elapsed = timer.finish_with_result(&result);
        assert!(elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn test_file_writer_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enricher.log");
        let file = Arc::new(Mutex::new(open_log_file(&path).unwrap()));

        let mut writer = FileWriter(Arc::clone(&file));
        writer.write_all(b"first line\n").unwrap();
        writer.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first line\n");
    }

    #[test]
    fn test_shared_file_writers_keep_lines_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enricher.log");
        let file = Arc::new(Mutex::new(open_log_file(&path).unwrap()));

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let mut writer = FileWriter(Arc::clone(&file));
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        writer.write_all(format!("writer {}\n", n).as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 100);
        assert!(contents.lines().all(|line| line.starts_with("writer ")));
    }
}
