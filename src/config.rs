use crate::classify::{ThresholdConfig, Thresholds, CPU, DISK, MEMORY, TEMPERATURE};
use crate::sampler::LoopSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub run_once: bool,
    #[serde(default = "default_cpu_window_ms")]
    pub cpu_window_ms: u64,
    #[serde(default = "default_top_processes")]
    pub top_processes: usize,
    #[serde(default = "default_console")]
    pub console: bool,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_cpu_thresholds")]
    pub cpu: Thresholds,
    #[serde(default = "default_memory_thresholds")]
    pub memory: Thresholds,
    #[serde(default = "default_disk_thresholds")]
    pub disk: Thresholds,
    #[serde(default = "default_temperature_thresholds")]
    pub temperature: Thresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            duration_secs: None,
            run_once: false,
            cpu_window_ms: default_cpu_window_ms(),
            top_processes: default_top_processes(),
            console: default_console(),
            log_file: None,
            listen: None,
            thresholds: ThresholdsConfig::default(),
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            cpu: default_cpu_thresholds(),
            memory: default_memory_thresholds(),
            disk: default_disk_thresholds(),
            temperature: default_temperature_thresholds(),
        }
    }
}

impl ThresholdsConfig {
    pub fn build(&self) -> Result<ThresholdConfig, ConfigError> {
        ThresholdConfig::new([
            (CPU, self.cpu),
            (MEMORY, self.memory),
            (DISK, self.disk),
            (TEMPERATURE, self.temperature),
        ])
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg = Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::load_from_file(path) {
            Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs должно быть >= 1".to_string(),
            ));
        }
        if self.duration_secs == Some(0) {
            return Err(ConfigError::Validation(
                "duration_secs должно быть >= 1".to_string(),
            ));
        }
        if self.cpu_window_ms < 200 {
            return Err(ConfigError::Validation(
                "cpu_window_ms должно быть >= 200".to_string(),
            ));
        }
        if let Some(listen) = &self.listen {
            if SocketAddr::from_str(listen).is_err() {
                return Err(ConfigError::Validation(
                    "поле listen должно быть корректным адресом host:port".to_string(),
                ));
            }
        }
        if let Some(log_file) = &self.log_file {
            if log_file.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "log_file не должен быть пустым".to_string(),
                ));
            }
        }

        self.thresholds.build()?;
        Ok(())
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            interval: Duration::from_secs(self.interval_secs),
            duration: self.duration_secs.map(Duration::from_secs),
            run_once: self.run_once,
        }
    }

    pub fn cpu_window(&self) -> Duration {
        Duration::from_millis(self.cpu_window_ms)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

const fn default_interval_secs() -> u64 {
    5
}

const fn default_cpu_window_ms() -> u64 {
    500
}

const fn default_top_processes() -> usize {
    10
}

const fn default_console() -> bool {
    true
}

const fn default_cpu_thresholds() -> Thresholds {
    Thresholds::new(80.0, 90.0)
}

const fn default_memory_thresholds() -> Thresholds {
    Thresholds::new(75.0, 85.0)
}

const fn default_disk_thresholds() -> Thresholds {
    Thresholds::new(80.0, 90.0)
}

const fn default_temperature_thresholds() -> Thresholds {
    Thresholds::new(70.0, 80.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().expect("дефолтная конфигурация валидна");
        assert_eq!(
            cfg.thresholds.build().expect("пороги"),
            ThresholdConfig::default()
        );
        let settings = cfg.loop_settings();
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert_eq!(settings.duration, None);
        assert!(!settings.run_once);
    }

    #[test]
    fn example_yaml_parses_and_validates() {
        let cfg = Config::from_yaml(Config::example_yaml()).expect("пример разбирается");
        cfg.validate().expect("пример валиден");
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let cfg = Config::from_yaml(
            "interval_secs: 10\nthresholds:\n  memory:\n    warning: 60\n    critical: 70\n",
        )
        .expect("yaml");
        assert_eq!(cfg.interval_secs, 10);
        assert_eq!(cfg.thresholds.memory, Thresholds::new(60.0, 70.0));
        assert_eq!(cfg.thresholds.cpu, default_cpu_thresholds());
        assert_eq!(cfg.cpu_window_ms, 500);
        assert!(cfg.console);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let mut cfg = Config::default();
        cfg.thresholds.disk = Thresholds::new(90.0, 80.0);
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn zero_interval_and_duration_are_rejected() {
        let mut cfg = Config::default();
        cfg.interval_secs = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        let mut cfg = Config::default();
        cfg.duration_secs = Some(0);
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        let mut cfg = Config::default();
        cfg.listen = Some("not-an-address".to_string());
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        cfg.listen = Some("127.0.0.1:9108".to_string());
        cfg.validate().expect("корректный адрес");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load_or_default("/nonexistent/healthwatch/config.yaml")
            .expect("дефолты при отсутствии файла");
        assert_eq!(cfg.interval_secs, 5);
    }

    #[test]
    fn loading_defers_validation_to_the_caller() {
        let path = std::env::temp_dir().join(format!(
            "healthwatch-config-{}.yaml",
            std::process::id()
        ));
        fs::write(&path, "interval_secs: 0\n").expect("запись временного файла");

        let loaded = Config::load_or_default(&path);
        let _ = fs::remove_file(&path);

        let cfg = loaded.expect("файл разбирается без валидации");
        assert_eq!(cfg.interval_secs, 0);
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }
}
