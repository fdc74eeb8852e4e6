use crate::classify::{Classification, MetricId, Severity};
use crate::collectors::{MetricReading, SourceError};
use crate::rates::RateStatus;
use crate::report::HealthReport;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("не удалось записать отчёт: {0}")]
    Io(#[from] io::Error),
    #[error("не удалось записать в лог-файл {path}: {source}")]
    LogFile { path: String, source: io::Error },
}

#[async_trait]
pub trait Reporter: Send {
    async fn deliver(&mut self, report: &HealthReport) -> Result<(), ReportError>;

    async fn cycle_failed(&mut self, _error: &SourceError) {}
}

#[async_trait]
impl Reporter for Box<dyn Reporter> {
    async fn deliver(&mut self, report: &HealthReport) -> Result<(), ReportError> {
        (**self).deliver(report).await
    }

    async fn cycle_failed(&mut self, error: &SourceError) {
        (**self).cycle_failed(error).await
    }
}

#[derive(Default)]
pub struct FanoutReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl FanoutReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }
}

#[async_trait]
impl Reporter for FanoutReporter {
    async fn deliver(&mut self, report: &HealthReport) -> Result<(), ReportError> {
        let mut first_err = None;
        for r in &mut self.reporters {
            if let Err(err) = r.deliver(report).await {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn cycle_failed(&mut self, error: &SourceError) {
        for r in &mut self.reporters {
            r.cycle_failed(error).await;
        }
    }
}

#[derive(Debug, Default)]
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    async fn deliver(&mut self, report: &HealthReport) -> Result<(), ReportError> {
        let value_of = |metric: &MetricId| {
            report
                .classifications
                .iter()
                .find(|c| &c.metric == metric)
                .map(format_class)
                .unwrap_or_else(|| "н/д".to_string())
        };
        info!(
            cycle = report.cycle,
            cpu = %value_of(&MetricId::Cpu),
            memory = %value_of(&MetricId::Memory),
            temperature = %value_of(&MetricId::Temperature),
            net_up = %bytes_per_sec_human(report.rates.bytes_sent_per_sec),
            net_down = %bytes_per_sec_human(report.rates.bytes_recv_per_sec),
            worst = report.worst_severity().map(Severity::as_str).unwrap_or("н/д"),
            alerts = report.alerts.len(),
            "состояние системы"
        );
        for alert in &report.alerts {
            warn!(metric = %alert.metric, severity = %alert.severity, "{}", alert.message);
        }
        Ok(())
    }
}

pub struct ConsoleReporter {
    stdout: bool,
    log_file: Option<(PathBuf, File)>,
}

impl ConsoleReporter {
    pub fn new(stdout: bool) -> Self {
        Self {
            stdout,
            log_file: None,
        }
    }

    pub fn with_log_file(mut self, path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let path = path.as_ref().to_path_buf();
        let log_err = |source| ReportError::LogFile {
            path: path.display().to_string(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(log_err)?;
        writeln!(
            file,
            "\n{}\nСеанс мониторинга начат {}",
            "=".repeat(50),
            humantime::format_rfc3339_seconds(std::time::SystemTime::now())
        )
        .map_err(log_err)?;
        self.log_file = Some((path, file));
        Ok(self)
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn deliver(&mut self, report: &HealthReport) -> Result<(), ReportError> {
        let text = render_report(report);
        if self.stdout {
            let mut out = io::stdout().lock();
            out.write_all(text.as_bytes())?;
            out.flush()?;
        }
        if let Some((path, file)) = &mut self.log_file {
            file.write_all(text.as_bytes())
                .map_err(|source| ReportError::LogFile {
                    path: path.display().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}

pub fn render_report(report: &HealthReport) -> String {
    let s = &report.snapshot;
    let rule = "=".repeat(60);
    let mut out = String::new();

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "ОТЧЁТ О СОСТОЯНИИ СИСТЕМЫ (цикл {})", report.cycle);
    let _ = writeln!(out, "Время: {}", format_unix(report.cycle_timestamp_unix));
    let _ = writeln!(out, "{rule}");

    let _ = writeln!(
        out,
        "Хост: {} | ОС: {} {} | Ядро: {} | Аптайм: {}",
        s.host.host_name.as_deref().unwrap_or("н/д"),
        s.host.os_name.as_deref().unwrap_or("н/д"),
        s.host.os_version.as_deref().unwrap_or_default(),
        s.host.kernel_version.as_deref().unwrap_or("н/д"),
        human_uptime(s.host.uptime_seconds),
    );
    let _ = writeln!(
        out,
        "Процессор: {} | Загрузка системы: {}",
        s.host.cpu_brand.as_deref().unwrap_or("н/д"),
        s.host
            .boot_time_unix
            .map(format_unix)
            .unwrap_or_else(|| "н/д".to_string()),
    );

    let cpu_line = match &s.cpu {
        MetricReading::Value(c) => format!("{:.1}% (ядер: {})", c.usage_percent, c.core_count),
        other => reading_gap(other),
    };
    let _ = writeln!(out, "\nCPU: {cpu_line} [{}]", severity_label(report, &MetricId::Cpu));

    let mem_line = match &s.memory {
        MetricReading::Value(m) => format!(
            "{:.2}/{:.2} ГБ ({:.1}%)",
            bytes_to_gb(m.used_bytes),
            bytes_to_gb(m.total_bytes),
            m.percent
        ),
        other => reading_gap(other),
    };
    let _ = writeln!(
        out,
        "Память: {mem_line} [{}]",
        severity_label(report, &MetricId::Memory)
    );

    let _ = writeln!(out, "Диски:");
    match &s.disks {
        MetricReading::Value(partitions) => {
            for p in partitions {
                let usage = match &p.usage {
                    MetricReading::Value(d) => format!(
                        "{:.2}/{:.2} ГБ ({:.1}%)",
                        bytes_to_gb(d.used_bytes),
                        bytes_to_gb(d.total_bytes),
                        d.percent
                    ),
                    other => reading_gap(other),
                };
                let id = MetricId::Disk(p.mount_point.clone());
                let _ = writeln!(
                    out,
                    "  • {} ({}): {usage} [{}]",
                    p.device_id,
                    p.mount_point,
                    severity_label(report, &id)
                );
            }
        }
        other => {
            let _ = writeln!(out, "  {}", reading_gap(other));
        }
    }

    let r = &report.rates;
    let net_line = match r.status {
        RateStatus::Baseline => "первый замер, скорость будет со следующего цикла".to_string(),
        RateStatus::Unavailable => "н/д".to_string(),
        RateStatus::Measured | RateStatus::CounterReset => format!(
            "↑ {} / ↓ {} | пакеты ↑ {:.0}/с ↓ {:.0}/с",
            bytes_per_sec_human(r.bytes_sent_per_sec),
            bytes_per_sec_human(r.bytes_recv_per_sec),
            r.packets_sent_per_sec,
            r.packets_recv_per_sec
        ),
    };
    let _ = writeln!(out, "Сеть: {net_line}");
    if let MetricReading::Value(n) = &s.network {
        let _ = writeln!(
            out,
            "  Всего: отправлено {} / получено {} | пакеты: отправлено {} / получено {}",
            bytes_human(n.bytes_sent),
            bytes_human(n.bytes_recv),
            n.packets_sent,
            n.packets_recv
        );
    }
    if r.status == RateStatus::CounterReset {
        let _ = writeln!(out, "  (счётчики сброшены с прошлого цикла)");
    }

    let temp_line = match &s.temperature_celsius {
        MetricReading::Value(t) => format!("{t:.1}°C"),
        other => reading_gap(other),
    };
    let _ = writeln!(
        out,
        "Температура: {temp_line} [{}]",
        severity_label(report, &MetricId::Temperature)
    );

    if !s.top_processes.is_empty() {
        let _ = writeln!(out, "\nТоп процессов по CPU:");
        let _ = writeln!(out, "  {:>7} {:>7} {:>7}  Имя", "PID", "CPU%", "MEM%");
        for p in &s.top_processes {
            let _ = writeln!(
                out,
                "  {:>7} {:>7.1} {:>7.1}  {}",
                p.pid, p.cpu_percent, p.memory_percent, p.name
            );
        }
    }

    if report.has_alerts() {
        let _ = writeln!(out, "\n[АЛЕРТЫ]");
        for a in &report.alerts {
            let _ = writeln!(out, "[!] {}", a.message);
        }
    }
    let _ = writeln!(out, "{rule}");
    out
}

fn severity_label(report: &HealthReport, metric: &MetricId) -> String {
    report
        .severity_of(metric)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "—".to_string())
}

fn format_class(c: &Classification) -> String {
    match (c.value, c.severity) {
        (Some(v), severity) => format!("{v:.1} [{severity}]"),
        (None, Severity::Error) => format!(
            "ошибка: {}",
            c.detail.as_deref().unwrap_or("неизвестно")
        ),
        (None, severity) => severity.to_string(),
    }
}

fn reading_gap<T>(reading: &MetricReading<T>) -> String {
    match reading {
        MetricReading::Failed(reason) => format!("ошибка чтения: {reason}"),
        _ => "н/д".to_string(),
    }
}

fn bytes_to_gb(bytes: u64) -> f64 {
    (bytes as f64) / 1024.0 / 1024.0 / 1024.0
}

pub fn bytes_per_sec_human(v: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    if v >= GB {
        format!("{:.2} GB/s", v / GB)
    } else if v >= MB {
        format!("{:.2} MB/s", v / MB)
    } else if v >= KB {
        format!("{:.2} KB/s", v / KB)
    } else {
        format!("{:.0} B/s", v)
    }
}

fn bytes_human(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut v = bytes as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{v:.2} {}", UNITS[unit])
    }
}

fn human_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let mins = (secs % 3600) / 60;

    if days > 0 {
        format!("{}д {}ч {}м", days, hours, mins)
    } else if hours > 0 {
        format!("{}ч {}м", hours, mins)
    } else if mins > 0 {
        format!("{}м", mins)
    } else {
        format!("{}с", secs)
    }
}

fn format_unix(ts: i64) -> String {
    let st = UNIX_EPOCH + Duration::from_secs(ts.max(0) as u64);
    humantime::format_rfc3339_seconds(st).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{aggregate_alerts, classify_snapshot, ThresholdConfig};
    use crate::collectors::{
        CpuStat, DiskPartition, DiskUsage, MemoryStat, NetCounters, ProcessStat, Snapshot,
    };
    use crate::rates::RateSample;
    use crate::report::build_report;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn sample_report(rates: RateSample) -> HealthReport {
        let mut s = Snapshot::unavailable(Instant::now(), 0);
        s.cpu = MetricReading::Value(CpuStat {
            usage_percent: 95.0,
            core_count: 4,
        });
        s.memory = MetricReading::Value(MemoryStat::new(8 * 1024 * 1024 * 1024, 2 * 1024 * 1024 * 1024));
        s.disks = MetricReading::Value(vec![
            DiskPartition {
                device_id: "sda1".to_string(),
                mount_point: "/".to_string(),
                usage: MetricReading::Value(DiskUsage::new(100, 50)),
            },
            DiskPartition {
                device_id: "sdb1".to_string(),
                mount_point: "/secure".to_string(),
                usage: MetricReading::Failed("permission denied".to_string()),
            },
        ]);
        s.host.cpu_brand = Some("AMD Ryzen 7 5800X".to_string());
        s.host.boot_time_unix = Some(1_700_000_000);
        s.network = MetricReading::Value(NetCounters {
            bytes_sent: 3 * 1024 * 1024 * 1024,
            bytes_recv: 512 * 1024,
            packets_sent: 1200,
            packets_recv: 3400,
        });
        s.top_processes = vec![ProcessStat {
            pid: 42,
            name: "postgres".to_string(),
            cpu_percent: 61.5,
            memory_percent: 3.2,
        }];
        let classes = classify_snapshot(&s, &ThresholdConfig::default());
        let alerts = aggregate_alerts(&classes);
        build_report(1, 0, s, rates, classes, alerts)
    }

    #[test]
    fn human_rates() {
        assert_eq!(bytes_per_sec_human(512.0), "512 B/s");
        assert_eq!(bytes_per_sec_human(1_048_576.0), "1.00 MB/s");
        assert_eq!(bytes_per_sec_human(1536.0), "1.50 KB/s");
    }

    #[test]
    fn render_includes_every_section() {
        let mut rates = RateSample::zero(RateStatus::Measured);
        rates.bytes_sent_per_sec = 1_048_576.0;
        let text = render_report(&sample_report(rates));

        assert!(text.contains("CPU: 95.0% (ядер: 4) [CRITICAL]"));
        assert!(text.contains("Память: 2.00/8.00 ГБ (25.0%) [NORMAL]"));
        assert!(text.contains("sda1 (/): 0.00/0.00 ГБ (50.0%) [NORMAL]"));
        assert!(text.contains("sdb1 (/secure): ошибка чтения: permission denied [ERROR]"));
        assert!(text.contains("↑ 1.00 MB/s"));
        assert!(text.contains("Температура: н/д [UNAVAILABLE]"));
        assert!(text.contains("postgres"));
        assert!(text.contains("[АЛЕРТЫ]"));
        assert!(text.contains("Процессор: AMD Ryzen 7 5800X"));
        assert!(text.contains("Загрузка системы: 2023-11-14T22:13:20Z"));
        assert!(text.contains(
            "Всего: отправлено 3.00 GB / получено 512.00 KB | пакеты: отправлено 1200 / получено 3400"
        ));
    }

    #[test]
    fn human_totals() {
        assert_eq!(bytes_human(900), "900 B");
        assert_eq!(bytes_human(1536), "1.50 KB");
        assert_eq!(bytes_human(5 * 1024 * 1024 * 1024 * 1024), "5.00 TB");
    }

    #[test]
    fn render_marks_baseline_and_reset() {
        let text = render_report(&sample_report(RateSample::zero(RateStatus::Baseline)));
        assert!(text.contains("первый замер"));

        let text = render_report(&sample_report(RateSample::zero(RateStatus::CounterReset)));
        assert!(text.contains("счётчики сброшены"));
    }

    struct Recording {
        seen: Arc<Mutex<Vec<u64>>>,
        fail: bool,
    }

    #[async_trait]
    impl Reporter for Recording {
        async fn deliver(&mut self, report: &HealthReport) -> Result<(), ReportError> {
            self.seen.lock().unwrap().push(report.cycle);
            if self.fail {
                return Err(ReportError::Io(io::Error::new(io::ErrorKind::Other, "сбой")));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn fanout_tries_every_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut fanout = FanoutReporter::new()
            .with(Recording {
                seen: seen.clone(),
                fail: true,
            })
            .with(Recording {
                seen: seen.clone(),
                fail: false,
            });
        assert_eq!(fanout.len(), 2);

        let result = fanout
            .deliver(&sample_report(RateSample::zero(RateStatus::Baseline)))
            .await;
        assert!(result.is_err());
        assert_eq!(*seen.lock().unwrap(), vec![1, 1]);
    }

    #[tokio::test]
    async fn console_reporter_appends_to_log_file() {
        let path = std::env::temp_dir().join(format!(
            "healthwatch-test-{}.log",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let mut reporter = ConsoleReporter::new(false)
            .with_log_file(&path)
            .expect("лог-файл открывается");
        let report = sample_report(RateSample::zero(RateStatus::Baseline));
        reporter.deliver(&report).await.expect("первая запись");
        reporter.deliver(&report).await.expect("вторая запись");

        let text = std::fs::read_to_string(&path).expect("лог-файл читается");
        assert!(text.contains("Сеанс мониторинга начат"));
        assert_eq!(text.matches("ОТЧЁТ О СОСТОЯНИИ СИСТЕМЫ").count(), 2);
        let _ = std::fs::remove_file(&path);
    }
}
