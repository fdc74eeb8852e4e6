pub mod system;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum MetricReading<T> {
    Value(T),
    Unavailable,
    Failed(String),
}

impl<T> MetricReading<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CpuStat {
    pub usage_percent: f64,
    pub core_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryStat {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub percent: f64,
}

impl MemoryStat {
    pub fn new(total_bytes: u64, used_bytes: u64) -> Self {
        Self {
            total_bytes,
            used_bytes,
            percent: usage_percent(used_bytes, total_bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskPartition {
    pub device_id: String,
    pub mount_point: String,
    pub usage: MetricReading<DiskUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub percent: f64,
}

impl DiskUsage {
    pub fn new(total_bytes: u64, used_bytes: u64) -> Self {
        Self {
            total_bytes,
            used_bytes,
            percent: usage_percent(used_bytes, total_bytes),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostInfo {
    pub host_name: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub cpu_brand: Option<String>,
    pub boot_time_unix: Option<i64>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessStat {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    #[serde(skip)]
    pub taken_at: Instant,
    pub captured_at_unix: i64,
    pub host: HostInfo,
    pub cpu: MetricReading<CpuStat>,
    pub memory: MetricReading<MemoryStat>,
    pub disks: MetricReading<Vec<DiskPartition>>,
    pub network: MetricReading<NetCounters>,
    pub temperature_celsius: MetricReading<f64>,
    pub top_processes: Vec<ProcessStat>,
}

impl Snapshot {
    pub fn unavailable(taken_at: Instant, captured_at_unix: i64) -> Self {
        Self {
            taken_at,
            captured_at_unix,
            host: HostInfo::default(),
            cpu: MetricReading::Unavailable,
            memory: MetricReading::Unavailable,
            disks: MetricReading::Unavailable,
            network: MetricReading::Unavailable,
            temperature_celsius: MetricReading::Unavailable,
            top_processes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.cpu.is_value()
            && !self.memory.is_value()
            && !self.disks.is_value()
            && !self.network.is_value()
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("источник метрик не вернул ни одного значения: {0}")]
    Exhausted(String),
}

/// Produces one snapshot of host state per call.
///
/// `sample` is allowed to block for `measurement_window()`: CPU usage only
/// means something when observed over an interval, and that wait is part of
/// the cycle's time budget.
#[async_trait]
pub trait MetricSource: Send {
    fn measurement_window(&self) -> Duration;

    async fn sample(&mut self) -> Result<Snapshot, SourceError>;
}

pub fn usage_percent(used: u64, total: u64) -> f64 {
    if total > 0 {
        (used as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_percent_handles_zero_total() {
        assert_eq!(usage_percent(10, 0), 0.0);
        assert_eq!(usage_percent(25, 100), 25.0);
    }

    #[test]
    fn empty_snapshot_has_no_core_values() {
        let mut snapshot = Snapshot::unavailable(Instant::now(), 0);
        assert!(snapshot.is_empty());

        snapshot.memory = MetricReading::Value(MemoryStat::new(100, 75));
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.memory.value().map(|m| m.percent), Some(75.0));
    }

    #[test]
    fn temperature_alone_does_not_count_as_a_snapshot() {
        let mut snapshot = Snapshot::unavailable(Instant::now(), 0);
        snapshot.temperature_celsius = MetricReading::Value(55.0);
        assert!(snapshot.is_empty());
    }
}
