use crate::collectors::{
    now_unix, CpuStat, DiskPartition, DiskUsage, HostInfo, MemoryStat, MetricReading,
    MetricSource, NetCounters, ProcessStat, Snapshot, SourceError,
};
use async_trait::async_trait;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use sysinfo::{
    ComponentExt, CpuExt, DiskExt, NetworkExt, NetworksExt, PidExt, ProcessExt, System,
    SystemExt,
};
use tokio::time::Instant;
use tracing::debug;

pub const MIN_CPU_WINDOW: Duration = Duration::from_millis(200);

pub struct SystemSource {
    system: System,
    cpu_window: Duration,
    top_processes: usize,
}

impl SystemSource {
    pub fn new(cpu_window: Duration, top_processes: usize) -> Self {
        Self {
            system: System::new(),
            cpu_window: cpu_window.max(MIN_CPU_WINDOW),
            top_processes,
        }
    }

    fn refresh_counters(&mut self) {
        self.system.refresh_cpu();
        if self.top_processes > 0 {
            self.system.refresh_processes();
        }
    }

    fn collect(&mut self) -> Snapshot {
        self.system.refresh_memory();
        self.system.refresh_disks_list();
        self.system.refresh_disks();
        self.system.refresh_networks_list();
        self.system.refresh_networks();
        self.system.refresh_components_list();
        self.system.refresh_components();

        let mut snapshot = Snapshot::unavailable(Instant::now(), now_unix());
        snapshot.host = collect_host(&self.system);
        snapshot.cpu = collect_cpu(&self.system);
        snapshot.memory = collect_memory(&self.system);
        snapshot.disks = collect_disks(&self.system);
        snapshot.network = collect_network(&self.system);
        snapshot.temperature_celsius = collect_temperature(&self.system);
        snapshot.top_processes = collect_top_processes(&self.system, self.top_processes);
        snapshot
    }
}

#[async_trait]
impl MetricSource for SystemSource {
    fn measurement_window(&self) -> Duration {
        self.cpu_window
    }

    async fn sample(&mut self) -> Result<Snapshot, SourceError> {
        self.refresh_counters();
        tokio::time::sleep(self.cpu_window).await;
        self.refresh_counters();

        let snapshot = self.collect();
        if snapshot.is_empty() {
            return Err(SourceError::Exhausted(
                "cpu, память, диски и сеть недоступны".to_string(),
            ));
        }
        Ok(snapshot)
    }
}

fn collect_host(system: &System) -> HostInfo {
    HostInfo {
        host_name: system.host_name(),
        os_name: system.name(),
        os_version: system.os_version(),
        kernel_version: system.kernel_version(),
        cpu_brand: system
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .filter(|b| !b.is_empty()),
        boot_time_unix: Some(system.boot_time())
            .filter(|t| *t > 0)
            .map(|t| t as i64),
        uptime_seconds: system.uptime(),
    }
}

fn collect_cpu(system: &System) -> MetricReading<CpuStat> {
    let cpus = system.cpus();
    if cpus.is_empty() {
        return MetricReading::Failed("sysinfo не вернул ни одного ядра".to_string());
    }
    let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
    MetricReading::Value(CpuStat {
        usage_percent: (sum / cpus.len() as f32) as f64,
        core_count: cpus.len() as u32,
    })
}

fn collect_memory(system: &System) -> MetricReading<MemoryStat> {
    let total = system.total_memory();
    if total == 0 {
        return MetricReading::Failed("общий объём памяти равен 0".to_string());
    }
    MetricReading::Value(MemoryStat::new(total, system.used_memory()))
}

fn collect_disks(system: &System) -> MetricReading<Vec<DiskPartition>> {
    let disks = system.disks();
    if disks.is_empty() {
        return MetricReading::Unavailable;
    }

    let partitions = disks
        .iter()
        .map(|d| {
            let total = d.total_space();
            let usage = if total == 0 {
                MetricReading::Failed("раздел не сообщает ёмкость".to_string())
            } else {
                let used = total.saturating_sub(d.available_space());
                MetricReading::Value(DiskUsage::new(total, used))
            };
            DiskPartition {
                device_id: d.name().to_string_lossy().to_string(),
                mount_point: d.mount_point().to_string_lossy().to_string(),
                usage,
            }
        })
        .collect();

    MetricReading::Value(partitions)
}

fn collect_network(system: &System) -> MetricReading<NetCounters> {
    let mut seen = 0_usize;
    let totals = system
        .networks()
        .iter()
        .fold(NetCounters::default(), |acc, (_iface, data)| {
            seen += 1;
            NetCounters {
                bytes_sent: acc.bytes_sent.saturating_add(data.total_transmitted()),
                bytes_recv: acc.bytes_recv.saturating_add(data.total_received()),
                packets_sent: acc
                    .packets_sent
                    .saturating_add(data.total_packets_transmitted()),
                packets_recv: acc
                    .packets_recv
                    .saturating_add(data.total_packets_received()),
            }
        });

    if seen == 0 {
        return MetricReading::Unavailable;
    }
    MetricReading::Value(totals)
}

fn collect_temperature(system: &System) -> MetricReading<f64> {
    let from_components = system
        .components()
        .iter()
        .map(|c| c.temperature() as f64)
        .find(|t| t.is_finite() && *t > 0.0);
    if let Some(t) = from_components {
        return MetricReading::Value(t);
    }

    let fallback = collect_linux_thermal_zone();
    debug!(
        components = system.components().len(),
        thermal_zone = ?fallback,
        "температура не найдена в компонентах sysinfo"
    );
    match fallback {
        Some(t) => MetricReading::Value(t),
        None => MetricReading::Unavailable,
    }
}

#[cfg(target_os = "linux")]
fn collect_linux_thermal_zone() -> Option<f64> {
    let entries = fs::read_dir("/sys/class/thermal").ok()?;

    let mut zones: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|v| v.to_str())
                .is_some_and(|n| n.starts_with("thermal_zone"))
        })
        .collect();
    zones.sort();

    zones.iter().find_map(|path| {
        let raw = fs::read_to_string(path.join("temp")).ok()?;
        let v = raw.trim().parse::<f64>().ok()?;
        let celsius = normalize_thermal_zone_temp(v);
        (celsius > 0.0).then_some(celsius)
    })
}

#[cfg(not(target_os = "linux"))]
fn collect_linux_thermal_zone() -> Option<f64> {
    None
}

fn normalize_thermal_zone_temp(v: f64) -> f64 {
    if v > 1000.0 {
        v / 1000.0
    } else {
        v
    }
}

fn collect_top_processes(system: &System, limit: usize) -> Vec<ProcessStat> {
    if limit == 0 {
        return Vec::new();
    }
    let total_memory = system.total_memory();
    let mut processes: Vec<ProcessStat> = system
        .processes()
        .iter()
        .map(|(pid, p)| ProcessStat {
            pid: pid.as_u32(),
            name: p.name().to_string(),
            cpu_percent: p.cpu_usage() as f64,
            memory_percent: crate::collectors::usage_percent(p.memory(), total_memory),
        })
        .collect();
    processes.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
    processes.truncate(limit);
    processes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thermal_zone_millidegrees_are_normalized() {
        assert_eq!(normalize_thermal_zone_temp(45_000.0), 45.0);
        assert_eq!(normalize_thermal_zone_temp(52.0), 52.0);
    }

    #[test]
    fn cpu_window_is_clamped_to_sysinfo_minimum() {
        let source = SystemSource::new(Duration::from_millis(50), 0);
        assert_eq!(source.measurement_window(), MIN_CPU_WINDOW);

        let source = SystemSource::new(Duration::from_millis(750), 0);
        assert_eq!(source.measurement_window(), Duration::from_millis(750));
    }
}
