//! Ошибки контейнера
//!
//! - **ContainerError**: структурные ошибки конфигурации, возвращаются сразу при регистрации
//! - **ResolutionFailed**: итоговая ошибка `resolve`, несет контракт и самую глубокую причину
//! - **InvokeError**: ошибки вызова конструкторов/методов/сеттеров через member provider
//!
//! Пользовательские ошибки (фабрики, тела конструкторов) переносятся как `anyhow::Error`.

use std::fmt;
use thiserror::Error;

use crate::pipeline::BuildStage;
use crate::registration::Category;
use crate::lifetime::LifetimeKind;

/// Ошибки конфигурации, обнаруживаемые до разрешения
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContainerError {
    /// Стадия цепочки уже занята другой стратегией
    #[error("Stage {stage:?} already holds a strategy")]
    StageOccupied { stage: BuildStage },

    /// Lifetime не совместим с категорией регистрации
    #[error("Lifetime {lifetime:?} cannot be used with {category:?} registrations")]
    InvalidLifetime {
        lifetime: LifetimeKind,
        category: Category,
    },

    /// Категория, которую нельзя регистрировать снаружи
    #[error("Registration category {category:?} is not supported here")]
    UnsupportedCategory { category: Category },

    /// Дескриптор без типов контракта
    #[error("Registration descriptor for {implementation} has no contract types")]
    EmptyDescriptor { implementation: String },

    /// Контейнер уже уничтожен
    #[error("Container scope {scope_id} is disposed")]
    Disposed { scope_id: u64 },

    /// Некорректная конфигурация
    #[error("Configuration error: {message}")]
    Configuration { message: String, field: Option<String> },
}

/// Причина сбоя внутри пайплайна
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Нет конструктора, сигнатура не совпала, нет делегата фабрики
    Configuration,
    /// Несовпадение аргументов, недоступный член
    Reflection,
    /// Тип не удалось загрузить/описать
    TypeLoad,
    /// Ошибка пользовательского кода
    User,
    /// Циклическая зависимость
    Cycle,
}

/// Итог неуспешного `resolve`
#[derive(Debug)]
pub struct ResolutionFailed {
    pub type_name: String,
    pub name: Option<String>,
    pub kind: FaultKind,
    pub message: String,
    /// Цепочка запросов от корня к месту сбоя
    pub path: Vec<String>,
    pub source: Option<anyhow::Error>,
}

impl ResolutionFailed {
    /// Самая глубокая пользовательская ошибка, если она есть
    pub fn user_error(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }
}

impl fmt::Display for ResolutionFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resolution of the dependency failed, type = {}, name = {}. ",
            self.type_name,
            self.name.as_deref().unwrap_or("(none)")
        )?;
        if !self.path.is_empty() {
            write!(f, "Exception occurred while: {}. ", self.path.join(" -> "))?;
        }
        write!(f, "Reason: {}", self.message)
    }
}

impl std::error::Error for ResolutionFailed {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| &**e as &(dyn std::error::Error + 'static))
    }
}

/// Ошибка вызова члена через member provider
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Argument {index} is not of type {expected}")]
    ArgumentMismatch { index: usize, expected: &'static str },

    #[error("Member '{member}' is not accessible: {reason}")]
    Inaccessible { member: String, reason: String },

    #[error("Type failed to load: {0}")]
    TypeLoad(String),

    #[error(transparent)]
    User(#[from] anyhow::Error),
}

impl InvokeError {
    pub fn kind(&self) -> FaultKind {
        match self {
            InvokeError::ArgumentMismatch { .. } | InvokeError::Inaccessible { .. } => {
                FaultKind::Reflection
            }
            InvokeError::TypeLoad(_) => FaultKind::TypeLoad,
            InvokeError::User(_) => FaultKind::User,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_failed_message_names_contract() {
        let failure = ResolutionFailed {
            type_name: "app::Service".into(),
            name: Some("primary".into()),
            kind: FaultKind::Configuration,
            message: "no accessible constructors".into(),
            path: vec!["app::Service(\"primary\")".into(), "app::Repo".into()],
            source: None,
        };

        let text = failure.to_string();
        assert!(text.contains("type = app::Service"));
        assert!(text.contains("name = primary"));
        assert!(text.contains("app::Service(\"primary\") -> app::Repo"));
        assert!(text.contains("no accessible constructors"));
    }

    #[test]
    fn test_user_error_is_source() {
        let failure = ResolutionFailed {
            type_name: "T".into(),
            name: None,
            kind: FaultKind::User,
            message: "boom".into(),
            path: Vec::new(),
            source: Some(anyhow::anyhow!("boom")),
        };

        assert!(failure.to_string().contains("name = (none)"));
        let source = std::error::Error::source(&failure).expect("source is kept");
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn test_invoke_error_kinds() {
        assert_eq!(
            InvokeError::ArgumentMismatch { index: 0, expected: "u32" }.kind(),
            FaultKind::Reflection
        );
        assert_eq!(InvokeError::TypeLoad("x".into()).kind(), FaultKind::TypeLoad);
        assert_eq!(InvokeError::User(anyhow::anyhow!("x")).kind(), FaultKind::User);
    }
}
