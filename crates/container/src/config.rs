//! Конфигурация контейнера
//!
//! Источники в порядке приоритета:
//! 1. Переменные окружения с префиксом `WIRING_`
//! 2. Файл конфигурации (TOML или JSON)
//! 3. Значения по умолчанию / пресеты
//!
//! Значения попадают в `Policies` при создании контейнера, поэтому
//! расширения могут заменить их во время работы.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::errors::ContainerError;
use crate::storage::prime::PRIMES;

/// Что делать с элементом массива, который не удалось разрешить
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayFailurePolicy {
    /// Пропускать только элементы, тип которых не удалось загрузить
    SkipTypeLoadErrors,
    SkipAll,
    /// Любой сбой элемента - сбой всего массива
    Fail,
}

impl Default for ArrayFailurePolicy {
    fn default() -> Self {
        ArrayFailurePolicy::SkipTypeLoadErrors
    }
}

impl FromStr for ArrayFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "skip_type_load_errors" | "skip_type_load" => Ok(ArrayFailurePolicy::SkipTypeLoadErrors),
            "skip_all" => Ok(ArrayFailurePolicy::SkipAll),
            "fail" => Ok(ArrayFailurePolicy::Fail),
            other => Err(anyhow!("Unknown array failure policy: {}", other)),
        }
    }
}

/// Когда использовать значение параметра по умолчанию
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValueRule {
    /// Только если контракт параметра не зарегистрирован
    OnFailure,
    Always,
    Never,
}

impl Default for DefaultValueRule {
    fn default() -> Self {
        DefaultValueRule::OnFailure
    }
}

impl FromStr for DefaultValueRule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "on_failure" => Ok(DefaultValueRule::OnFailure),
            "always" => Ok(DefaultValueRule::Always),
            "never" => Ok(DefaultValueRule::Never),
            other => Err(anyhow!("Unknown default value rule: {}", other)),
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace('-', "_")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Начальная емкость корневого scope
    pub scope_capacity: usize,
    pub child_scope_capacity: usize,
    pub policy_capacity: usize,
    pub array_failure: ArrayFailurePolicy,
    pub default_values: DefaultValueRule,
    /// Логировать каждую сборку с длительностью (стадия Setup)
    pub diagnostics: bool,
    pub detect_cycles: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            scope_capacity: 37,
            child_scope_capacity: 3,
            policy_capacity: 17,
            array_failure: ArrayFailurePolicy::default(),
            default_values: DefaultValueRule::default(),
            diagnostics: false,
            detect_cycles: true,
        }
    }
}

impl ContainerConfig {
    pub fn production() -> Self {
        Self {
            scope_capacity: 197,
            child_scope_capacity: 17,
            policy_capacity: 37,
            ..Self::default()
        }
    }

    pub fn development() -> Self {
        Self {
            diagnostics: true,
            array_failure: ArrayFailurePolicy::Fail,
            ..Self::default()
        }
    }

    pub fn minimal() -> Self {
        Self {
            scope_capacity: 1,
            child_scope_capacity: 1,
            policy_capacity: 1,
            detect_cycles: false,
            ..Self::default()
        }
    }

    pub fn from_preset_name(name: &str) -> Result<Self> {
        match normalize(name).as_str() {
            "production" | "prod" => Ok(Self::production()),
            "development" | "dev" => Ok(Self::development()),
            "minimal" => Ok(Self::minimal()),
            "default" => Ok(Self::default()),
            other => Err(anyhow!("Unknown configuration preset: {}", other)),
        }
    }

    pub fn validate(&self) -> Result<(), ContainerError> {
        let limit = PRIMES[PRIMES.len() - 2];
        let capacities = [
            ("scope_capacity", self.scope_capacity),
            ("child_scope_capacity", self.child_scope_capacity),
            ("policy_capacity", self.policy_capacity),
        ];

        for (field, value) in capacities {
            if value > limit {
                return Err(ContainerError::Configuration {
                    message: format!("{} = {} exceeds the storage limit {}", field, value, limit),
                    field: Some(field.to_string()),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for ContainerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "capacity={}/{}/{} arrays={:?} defaults={:?} diagnostics={} cycles={}",
            self.scope_capacity,
            self.child_scope_capacity,
            self.policy_capacity,
            self.array_failure,
            self.default_values,
            self.diagnostics,
            self.detect_cycles
        )
    }
}

/// Загрузчик конфигурации из файла и окружения
pub struct ConfigLoader {
    env_prefix: String,
    validate_on_load: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            env_prefix: "WIRING".to_string(),
            validate_on_load: true,
        }
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn validate(mut self, enabled: bool) -> Self {
        self.validate_on_load = enabled;
        self
    }

    /// Файл (если указан), затем окружение процесса
    pub fn load(&self, path: Option<&Path>) -> Result<ContainerConfig> {
        let mut config = match path {
            Some(path) => self.load_from_file(path)?,
            None => ContainerConfig::default(),
        };

        self.apply_overrides(&mut config, std::env::vars())?;

        if self.validate_on_load {
            config.validate()?;
        }
        info!(%config, "Container configuration loaded");
        Ok(config)
    }

    pub fn load_from_file(&self, path: &Path) -> Result<ContainerConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => self.load_from_toml(&content),
            Some("json") => self.load_from_json(&content),
            _ => Err(anyhow!(
                "Unsupported configuration file format: {:?}",
                path.extension()
            )),
        }
    }

    pub fn load_from_toml(&self, content: &str) -> Result<ContainerConfig> {
        let config: ContainerConfig =
            toml::from_str(content).context("Failed to parse TOML configuration")?;
        Ok(config)
    }

    pub fn load_from_json(&self, content: &str) -> Result<ContainerConfig> {
        let config: ContainerConfig =
            serde_json::from_str(content).context("Failed to parse JSON configuration")?;
        Ok(config)
    }

    pub fn save_to_file(&self, config: &ContainerConfig, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::to_string_pretty(config)?,
            Some("json") => serde_json::to_string_pretty(config)?,
            _ => {
                return Err(anyhow!(
                    "Unsupported file format: {:?}",
                    path.extension()
                ))
            }
        };
        fs::write(path, content)?;
        Ok(())
    }

    /// Применить переменные `<PREFIX>_<FIELD>`; чужие переменные игнорируются
    pub fn apply_overrides(
        &self,
        config: &mut ContainerConfig,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<()> {
        let prefix = format!("{}_", self.env_prefix);

        for (key, value) in vars {
            let Some(field) = key.strip_prefix(&prefix) else {
                continue;
            };

            match field {
                "PRESET" => {
                    *config = ContainerConfig::from_preset_name(&value)?;
                }
                "SCOPE_CAPACITY" => config.scope_capacity = parse_number(&key, &value)?,
                "CHILD_SCOPE_CAPACITY" => config.child_scope_capacity = parse_number(&key, &value)?,
                "POLICY_CAPACITY" => config.policy_capacity = parse_number(&key, &value)?,
                "ARRAY_FAILURE" => config.array_failure = value.parse()?,
                "DEFAULT_VALUES" => config.default_values = value.parse()?,
                "DIAGNOSTICS" => config.diagnostics = parse_flag(&key, &value)?,
                "DETECT_CYCLES" => config.detect_cycles = parse_flag(&key, &value)?,
                _ => {
                    debug!(variable = %key, "Unknown configuration variable ignored");
                    continue;
                }
            }
            debug!(variable = %key, %value, "Configuration override applied");
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a non-negative integer, got '{}'", key, value))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match normalize(value).as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean, got '{}'", key, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ConfigLoader::new()
            .load_from_toml("diagnostics = true\narray_failure = \"skip_all\"\n")
            .expect("valid toml");

        assert!(config.diagnostics);
        assert_eq!(config.array_failure, ArrayFailurePolicy::SkipAll);
        assert_eq!(config.scope_capacity, ContainerConfig::default().scope_capacity);
    }

    #[test]
    fn test_environment_overrides() {
        let loader = ConfigLoader::new();
        let mut config = ContainerConfig::default();
        loader
            .apply_overrides(
                &mut config,
                vars(&[
                    ("WIRING_ARRAY_FAILURE", "fail"),
                    ("WIRING_DEFAULT_VALUES", "never"),
                    ("WIRING_DETECT_CYCLES", "off"),
                    ("WIRING_SCOPE_CAPACITY", "101"),
                    ("OTHER_SCOPE_CAPACITY", "5"),
                ]),
            )
            .expect("valid overrides");

        assert_eq!(config.array_failure, ArrayFailurePolicy::Fail);
        assert_eq!(config.default_values, DefaultValueRule::Never);
        assert!(!config.detect_cycles);
        assert_eq!(config.scope_capacity, 101);
    }

    #[test]
    fn test_invalid_override_is_error() {
        let loader = ConfigLoader::new();
        let mut config = ContainerConfig::default();
        assert!(loader
            .apply_overrides(&mut config, vars(&[("WIRING_SCOPE_CAPACITY", "many")]))
            .is_err());
        assert!(loader
            .apply_overrides(&mut config, vars(&[("WIRING_ARRAY_FAILURE", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_capacity() {
        let config = ContainerConfig {
            scope_capacity: usize::MAX,
            ..ContainerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ContainerError::Configuration { field: Some(ref f), .. }) if f == "scope_capacity"
        ));
        assert!(ContainerConfig::production().validate().is_ok());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("container.toml");
        let loader = ConfigLoader::new();

        loader
            .save_to_file(&ContainerConfig::development(), &path)
            .expect("saved");
        let loaded = loader.load_from_file(&path).expect("loaded");
        assert_eq!(loaded, ContainerConfig::development());
    }
}
