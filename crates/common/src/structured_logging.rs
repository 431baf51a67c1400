use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Write};
use std::time::Instant;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// Структурированная запись лога в JSON формате
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredLogEntry {
    /// Временная метка в ISO 8601 формате
    pub timestamp: String,
    /// Уровень логирования
    pub level: String,
    /// Целевой модуль/компонент
    pub target: String,
    /// Основное сообщение
    pub message: String,
    /// Дополнительные поля
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
    /// Контекст выполнения
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ExecutionContext>,
    /// Метрики разрешения зависимостей
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionMetrics>,
}

/// Контекст выполнения для отслеживания
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Версия приложения
    pub app_version: String,
    /// Имя хоста
    pub hostname: String,
    /// ID процесса
    pub pid: u32,
    /// ID потока
    pub thread_id: String,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            thread_id: format!("{:?}", std::thread::current().id()),
        }
    }
}

/// Метрики одного разрешения (build) контейнера
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionMetrics {
    /// Длительность в микросекундах
    pub duration_us: Option<u64>,
    /// Глубина вложенности запроса в графе зависимостей
    pub depth: Option<u64>,
    /// Значение взято из lifetime storage без построения
    pub cache_hit: Option<bool>,
}

/// Форматтер для JSON логов
pub struct JsonFormatter;

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

        let resolution = visitor.extract_resolution_metrics();

        let entry = StructuredLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            context: Some(ExecutionContext::default()),
            resolution,
        };

        if let Ok(json) = serde_json::to_string(&entry) {
            let _ = writeln!(io::stdout(), "{}", json);
        }
    }
}

/// Визитор для извлечения полей из события
#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: HashMap<String, Value>,
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(format!("{:?}", value)));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::Bool(value));
    }
}

impl JsonVisitor {
    /// Извлечь метрики разрешения из полей
    fn extract_resolution_metrics(&self) -> Option<ResolutionMetrics> {
        let metrics = ResolutionMetrics {
            duration_us: self.fields.get("duration_us").and_then(|v| v.as_u64()),
            depth: self.fields.get("depth").and_then(|v| v.as_u64()),
            cache_hit: self.fields.get("cache_hit").and_then(|v| v.as_bool()),
        };

        if metrics.duration_us.is_some() || metrics.depth.is_some() || metrics.cache_hit.is_some() {
            Some(metrics)
        } else {
            None
        }
    }
}

/// Конфигурация для structured logging
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Минимальный уровень логирования
    pub level: Level,
    /// Вывод в JSON формате
    pub json_output: bool,
    /// Включить цветной вывод (только для non-JSON)
    pub color_output: bool,
    /// Включить номера строк
    pub include_line_numbers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_output: false,
            color_output: true,
            include_line_numbers: cfg!(debug_assertions),
        }
    }
}

impl LoggingConfig {
    /// Подробный вывод для отладки резолвинга
    pub fn verbose() -> Self {
        Self {
            level: Level::TRACE,
            include_line_numbers: true,
            ..Self::default()
        }
    }

    pub fn json() -> Self {
        Self {
            json_output: true,
            color_output: false,
            ..Self::default()
        }
    }
}

/// Инициализировать structured logging
pub fn init_structured_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    if config.json_output {
        // JSON формат для production
        let subscriber = Registry::default().with(env_filter).with(JsonFormatter);

        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // Человекочитаемый формат для разработки
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_line_number(config.include_line_numbers)
            .with_ansi(config.color_output)
            .with_span_events(FmtSpan::CLOSE);

        let subscriber = Registry::default().with(env_filter).with(fmt_layer);

        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Логирование для тестов: пишет через test writer, повторные вызовы игнорируются
pub fn init_test_logging() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Вспомогательная структура для измерения времени операций
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
    fields: HashMap<String, Value>,
    depth: Option<u64>,
    cache_hit: Option<bool>,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            operation_name: operation_name.into(),
            fields: HashMap::new(),
            depth: None,
            cache_hit: None,
        }
    }

    /// Метрики разрешения; попадают в событие отдельными полями (`ResolutionMetrics`)
    pub fn record_resolution(&mut self, depth: u64, cache_hit: bool) {
        self.depth = Some(depth);
        self.cache_hit = Some(cache_hit);
    }

    pub fn add_field(&mut self, key: impl Into<String>, value: impl Serialize) {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    pub fn finish(self) {
        tracing::debug!(
            operation = %self.operation_name,
            duration_us = self.elapsed_us(),
            depth = self.depth,
            cache_hit = self.cache_hit,
            success = true,
            fields = ?self.fields,
            "Operation completed"
        );
    }

    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: &Result<T, E>) {
        let duration_us = self.elapsed_us();

        match result {
            Ok(_) => {
                tracing::debug!(
                    operation = %self.operation_name,
                    duration_us = duration_us,
                    depth = self.depth,
                    cache_hit = self.cache_hit,
                    success = true,
                    fields = ?self.fields,
                    "Operation completed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    operation = %self.operation_name,
                    duration_us = duration_us,
                    depth = self.depth,
                    cache_hit = self.cache_hit,
                    success = false,
                    error = %e,
                    fields = ?self.fields,
                    "Operation failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_log_entry_serialization() {
        let entry = StructuredLogEntry {
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            level: "DEBUG".to_string(),
            target: "container::resolution".to_string(),
            message: "Build completed".to_string(),
            fields: HashMap::new(),
            context: Some(ExecutionContext::default()),
            resolution: Some(ResolutionMetrics {
                duration_us: Some(42),
                depth: Some(2),
                cache_hit: Some(false),
            }),
        };

        let json = serde_json::to_string_pretty(&entry).expect("entry serializes");
        assert!(json.contains("timestamp"));
        assert!(json.contains("DEBUG"));
        assert!(json.contains("Build completed"));
        assert!(json.contains("duration_us"));
    }

    #[test]
    fn test_visitor_extracts_resolution_metrics() {
        let mut visitor = JsonVisitor::default();
        visitor.fields.insert("duration_us".into(), Value::Number(15u64.into()));
        visitor.fields.insert("cache_hit".into(), Value::Bool(true));

        let metrics = visitor.extract_resolution_metrics().expect("metrics present");
        assert_eq!(metrics.duration_us, Some(15));
        assert_eq!(metrics.cache_hit, Some(true));
        assert_eq!(metrics.depth, None);

        assert!(JsonVisitor::default().extract_resolution_metrics().is_none());
    }

    #[test]
    fn test_operation_timer() {
        let mut timer = OperationTimer::new("resolve");
        timer.add_field("contract", "Service");

        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(timer.elapsed_us() >= 2000);
        assert_eq!(timer.operation_name(), "resolve");

        timer.finish_with_result::<(), String>(&Ok(()));
    }

    /// Слой, который собирает метрики из каждого события
    struct Capture(std::sync::Arc<std::sync::Mutex<Vec<Option<ResolutionMetrics>>>>);

    impl<S: Subscriber> Layer<S> for Capture {
        fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            let mut visitor = JsonVisitor::default();
            event.record(&mut visitor);
            if let Ok(mut captured) = self.0.lock() {
                captured.push(visitor.extract_resolution_metrics());
            }
        }
    }

    #[test]
    fn test_operation_timer_emits_resolution_metrics() {
        let captured = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let subscriber = Registry::default().with(Capture(std::sync::Arc::clone(&captured)));

        tracing::subscriber::with_default(subscriber, || {
            let mut timer = OperationTimer::new("container_resolve");
            timer.record_resolution(2, true);
            timer.finish_with_result::<(), String>(&Ok(()));

            OperationTimer::new("plain").finish();
        });

        let captured = captured.lock().expect("not poisoned");
        assert_eq!(captured.len(), 2);
        let metrics = captured[0].clone().expect("metrics recorded");
        assert_eq!(metrics.depth, Some(2));
        assert_eq!(metrics.cache_hit, Some(true));
        assert!(metrics.duration_us.is_some());

        let plain = captured[1].clone().expect("duration only");
        assert_eq!(plain.depth, None);
        assert_eq!(plain.cache_hit, None);
    }
}
