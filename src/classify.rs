use crate::collectors::{MetricReading, Snapshot};
use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";
pub const DISK: &str = "disk";
pub const TEMPERATURE: &str = "temperature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
    Unavailable,
    Error,
}

impl Severity {
    pub fn is_alert(self) -> bool {
        matches!(self, Self::Warning | Self::Critical)
    }

    pub fn level(self) -> Option<u8> {
        match self {
            Self::Normal => Some(0),
            Self::Warning => Some(1),
            Self::Critical => Some(2),
            Self::Unavailable | Self::Error => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Thresholds {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdConfig {
    entries: BTreeMap<String, Thresholds>,
}

impl ThresholdConfig {
    pub fn new<I, K>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, Thresholds)>,
        K: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (name, t) in entries {
            let name = name.into();
            if !t.warning.is_finite() || !t.critical.is_finite() {
                return Err(ConfigError::Validation(format!(
                    "пороги '{name}' должны быть конечными числами"
                )));
            }
            if t.warning >= t.critical {
                return Err(ConfigError::Validation(format!(
                    "порог warning ({}) для '{name}' должен быть меньше critical ({})",
                    t.warning, t.critical
                )));
            }
            map.insert(name, t);
        }
        Ok(Self { entries: map })
    }

    pub fn get(&self, metric: &str) -> Option<Thresholds> {
        self.entries.get(metric).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Thresholds)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            entries: BTreeMap::from([
                (CPU.to_string(), Thresholds::new(80.0, 90.0)),
                (MEMORY.to_string(), Thresholds::new(75.0, 85.0)),
                (DISK.to_string(), Thresholds::new(80.0, 90.0)),
                (TEMPERATURE.to_string(), Thresholds::new(70.0, 80.0)),
            ]),
        }
    }
}

/// Strictly greater-than at both boundaries: a value equal to a threshold
/// stays at the lower severity.
pub fn classify(value: f64, warning: f64, critical: f64) -> Severity {
    if value > critical {
        Severity::Critical
    } else if value > warning {
        Severity::Warning
    } else {
        Severity::Normal
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "mount_point", rename_all = "snake_case")]
pub enum MetricId {
    Cpu,
    Memory,
    Disks,
    Disk(String),
    Temperature,
}

impl MetricId {
    pub fn threshold_key(&self) -> &'static str {
        match self {
            Self::Cpu => CPU,
            Self::Memory => MEMORY,
            Self::Disks | Self::Disk(_) => DISK,
            Self::Temperature => TEMPERATURE,
        }
    }

    fn unit(&self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            _ => "%",
        }
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disk(mount) => write!(f, "disk:{mount}"),
            other => f.write_str(other.threshold_key()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub metric: MetricId,
    pub value: Option<f64>,
    pub severity: Severity,
    pub thresholds: Thresholds,
    pub detail: Option<String>,
}

fn classify_reading<T>(
    metric: MetricId,
    reading: &MetricReading<T>,
    value_of: impl Fn(&T) -> f64,
    thresholds: Thresholds,
) -> Classification {
    let (value, severity, detail) = match reading {
        MetricReading::Value(v) => {
            let value = value_of(v);
            (
                Some(value),
                classify(value, thresholds.warning, thresholds.critical),
                None,
            )
        }
        MetricReading::Unavailable => (None, Severity::Unavailable, None),
        MetricReading::Failed(reason) => (None, Severity::Error, Some(reason.clone())),
    };
    Classification {
        metric,
        value,
        severity,
        thresholds,
        detail,
    }
}

pub fn classify_snapshot(snapshot: &Snapshot, config: &ThresholdConfig) -> Vec<Classification> {
    let mut out = Vec::new();

    if let Some(t) = config.get(CPU) {
        out.push(classify_reading(
            MetricId::Cpu,
            &snapshot.cpu,
            |c| c.usage_percent,
            t,
        ));
    }
    if let Some(t) = config.get(MEMORY) {
        out.push(classify_reading(
            MetricId::Memory,
            &snapshot.memory,
            |m| m.percent,
            t,
        ));
    }
    if let Some(t) = config.get(DISK) {
        match &snapshot.disks {
            MetricReading::Value(partitions) => {
                for p in partitions {
                    out.push(classify_reading(
                        MetricId::Disk(p.mount_point.clone()),
                        &p.usage,
                        |d| d.percent,
                        t,
                    ));
                }
            }
            MetricReading::Unavailable => {
                out.push(classify_reading::<()>(
                    MetricId::Disks,
                    &MetricReading::Unavailable,
                    |_| 0.0,
                    t,
                ));
            }
            MetricReading::Failed(reason) => {
                out.push(classify_reading::<()>(
                    MetricId::Disks,
                    &MetricReading::Failed(reason.clone()),
                    |_| 0.0,
                    t,
                ));
            }
        }
    }
    if let Some(t) = config.get(TEMPERATURE) {
        out.push(classify_reading(
            MetricId::Temperature,
            &snapshot.temperature_celsius,
            |v| *v,
            t,
        ));
    }

    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub metric: MetricId,
    pub value: f64,
    pub severity: Severity,
    pub message: String,
}

pub fn aggregate_alerts(classifications: &[Classification]) -> Vec<AlertEvent> {
    classifications
        .iter()
        .filter(|c| c.severity.is_alert())
        .filter_map(|c| {
            let value = c.value?;
            Some(AlertEvent {
                metric: c.metric.clone(),
                value,
                severity: c.severity,
                message: alert_message(&c.metric, value, c.severity, c.thresholds),
            })
        })
        .collect()
}

fn alert_message(metric: &MetricId, value: f64, severity: Severity, t: Thresholds) -> String {
    let title = match metric {
        MetricId::Cpu => "Высокая нагрузка CPU".to_string(),
        MetricId::Memory => "Высокое использование RAM".to_string(),
        MetricId::Disks => "Высокая заполненность дисков".to_string(),
        MetricId::Disk(mount) => format!("Высокая заполненность диска {mount}"),
        MetricId::Temperature => "Высокая температура".to_string(),
    };
    let threshold = if severity == Severity::Critical {
        t.critical
    } else {
        t.warning
    };
    let unit = metric.unit();
    format!("{title}: {value:.1}{unit} (порог {severity} {threshold:.1}{unit})")
}
