use crate::classify::Severity;
use crate::collectors::{MetricReading, SourceError};
use crate::rates::RateStatus;
use crate::report::HealthReport;
use crate::reporter::{ReportError, Reporter};
use async_trait::async_trait;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type LatestReport = Arc<RwLock<Option<HealthReport>>>;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub agent_cpu_usage_percent: Gauge,
    pub agent_cpu_core_count: Gauge,
    pub agent_memory_used_bytes: Gauge,
    pub agent_memory_total_bytes: Gauge,
    pub agent_memory_usage_percent: Gauge,
    pub agent_disk_used_bytes: GaugeVec,
    pub agent_disk_total_bytes: GaugeVec,
    pub agent_disk_usage_percent: GaugeVec,
    pub agent_disk_count: Gauge,
    pub agent_temperature_celsius: Gauge,
    pub agent_net_tx_bytes_per_sec: Gauge,
    pub agent_net_rx_bytes_per_sec: Gauge,
    pub agent_net_tx_packets_per_sec: Gauge,
    pub agent_net_rx_packets_per_sec: Gauge,
    pub agent_net_counter_resets_total: Counter,
    pub agent_metric_severity: GaugeVec,
    pub agent_alerts_active: Gauge,
    pub agent_alerts_total: CounterVec,
    pub agent_host_uptime_seconds: Gauge,
    pub agent_cycles_total: Counter,
    pub agent_cycle_failures_total: Counter,
    pub agent_scrape_count_total: Counter,
    pub agent_last_report_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let agent_cpu_usage_percent = Gauge::with_opts(opts!(
            "agent_cpu_usage_percent",
            "Average CPU usage across cores in percent (0..100)"
        ))?;
        let agent_cpu_core_count =
            Gauge::with_opts(opts!("agent_cpu_core_count", "Number of logical CPU cores"))?;
        let agent_memory_used_bytes =
            Gauge::with_opts(opts!("agent_memory_used_bytes", "Used memory in bytes"))?;
        let agent_memory_total_bytes =
            Gauge::with_opts(opts!("agent_memory_total_bytes", "Total memory in bytes"))?;
        let agent_memory_usage_percent =
            Gauge::with_opts(opts!("agent_memory_usage_percent", "Memory usage in percent"))?;
        let agent_disk_used_bytes = GaugeVec::new(
            opts!("agent_disk_used_bytes", "Disk used bytes by mount"),
            &["mount", "device"],
        )?;
        let agent_disk_total_bytes = GaugeVec::new(
            opts!("agent_disk_total_bytes", "Disk total bytes by mount"),
            &["mount", "device"],
        )?;
        let agent_disk_usage_percent = GaugeVec::new(
            opts!("agent_disk_usage_percent", "Disk usage in percent by mount"),
            &["mount", "device"],
        )?;
        let agent_disk_count =
            Gauge::with_opts(opts!("agent_disk_count", "Number of discovered partitions"))?;
        let agent_temperature_celsius = Gauge::with_opts(opts!(
            "agent_temperature_celsius",
            "System temperature in Celsius"
        ))?;
        let agent_net_tx_bytes_per_sec = Gauge::with_opts(opts!(
            "agent_net_tx_bytes_per_sec",
            "Transmit rate in bytes per second across all interfaces"
        ))?;
        let agent_net_rx_bytes_per_sec = Gauge::with_opts(opts!(
            "agent_net_rx_bytes_per_sec",
            "Receive rate in bytes per second across all interfaces"
        ))?;
        let agent_net_tx_packets_per_sec = Gauge::with_opts(opts!(
            "agent_net_tx_packets_per_sec",
            "Transmitted packets per second across all interfaces"
        ))?;
        let agent_net_rx_packets_per_sec = Gauge::with_opts(opts!(
            "agent_net_rx_packets_per_sec",
            "Received packets per second across all interfaces"
        ))?;
        let agent_net_counter_resets_total = Counter::with_opts(opts!(
            "agent_net_counter_resets_total",
            "Cycles in which a network counter went backwards"
        ))?;
        let agent_metric_severity = GaugeVec::new(
            opts!(
                "agent_metric_severity",
                "Severity by metric: 0 normal, 1 warning, 2 critical, -1 unavailable, -2 error"
            ),
            &["metric"],
        )?;
        let agent_alerts_active =
            Gauge::with_opts(opts!("agent_alerts_active", "Alerts in the latest report"))?;
        let agent_alerts_total = CounterVec::new(
            opts!("agent_alerts_total", "Alerts raised total by severity"),
            &["severity"],
        )?;
        let agent_host_uptime_seconds =
            Gauge::with_opts(opts!("agent_host_uptime_seconds", "Host uptime in seconds"))?;
        let agent_cycles_total =
            Counter::with_opts(opts!("agent_cycles_total", "Completed sampling cycles"))?;
        let agent_cycle_failures_total = Counter::with_opts(opts!(
            "agent_cycle_failures_total",
            "Cycles that produced no snapshot"
        ))?;
        let agent_scrape_count_total =
            Counter::with_opts(opts!("agent_scrape_count_total", "Number of /metrics scrapes"))?;
        let agent_last_report_timestamp_seconds = Gauge::with_opts(opts!(
            "agent_last_report_timestamp_seconds",
            "Unix timestamp of the last report"
        ))?;

        register(&registry, &agent_cpu_usage_percent)?;
        register(&registry, &agent_cpu_core_count)?;
        register(&registry, &agent_memory_used_bytes)?;
        register(&registry, &agent_memory_total_bytes)?;
        register(&registry, &agent_memory_usage_percent)?;
        register(&registry, &agent_disk_used_bytes)?;
        register(&registry, &agent_disk_total_bytes)?;
        register(&registry, &agent_disk_usage_percent)?;
        register(&registry, &agent_disk_count)?;
        register(&registry, &agent_temperature_celsius)?;
        register(&registry, &agent_net_tx_bytes_per_sec)?;
        register(&registry, &agent_net_rx_bytes_per_sec)?;
        register(&registry, &agent_net_tx_packets_per_sec)?;
        register(&registry, &agent_net_rx_packets_per_sec)?;
        register(&registry, &agent_net_counter_resets_total)?;
        register(&registry, &agent_metric_severity)?;
        register(&registry, &agent_alerts_active)?;
        register(&registry, &agent_alerts_total)?;
        register(&registry, &agent_host_uptime_seconds)?;
        register(&registry, &agent_cycles_total)?;
        register(&registry, &agent_cycle_failures_total)?;
        register(&registry, &agent_scrape_count_total)?;
        register(&registry, &agent_last_report_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            agent_cpu_usage_percent,
            agent_cpu_core_count,
            agent_memory_used_bytes,
            agent_memory_total_bytes,
            agent_memory_usage_percent,
            agent_disk_used_bytes,
            agent_disk_total_bytes,
            agent_disk_usage_percent,
            agent_disk_count,
            agent_temperature_celsius,
            agent_net_tx_bytes_per_sec,
            agent_net_rx_bytes_per_sec,
            agent_net_tx_packets_per_sec,
            agent_net_rx_packets_per_sec,
            agent_net_counter_resets_total,
            agent_metric_severity,
            agent_alerts_active,
            agent_alerts_total,
            agent_host_uptime_seconds,
            agent_cycles_total,
            agent_cycle_failures_total,
            agent_scrape_count_total,
            agent_last_report_timestamp_seconds,
        }))
    }

    pub fn update_from_report(&self, report: &HealthReport) {
        let s = &report.snapshot;
        self.agent_cycles_total.inc();
        self.agent_last_report_timestamp_seconds
            .set(report.cycle_timestamp_unix as f64);
        self.agent_host_uptime_seconds
            .set(s.host.uptime_seconds as f64);

        // A metric that could not be read this cycle is exported as NaN, never
        // as the last good value.
        match &s.cpu {
            MetricReading::Value(cpu) => {
                self.agent_cpu_usage_percent.set(cpu.usage_percent);
                self.agent_cpu_core_count.set(cpu.core_count as f64);
            }
            _ => {
                self.agent_cpu_usage_percent.set(f64::NAN);
                self.agent_cpu_core_count.set(f64::NAN);
            }
        }
        match &s.memory {
            MetricReading::Value(mem) => {
                self.agent_memory_used_bytes.set(mem.used_bytes as f64);
                self.agent_memory_total_bytes.set(mem.total_bytes as f64);
                self.agent_memory_usage_percent.set(mem.percent);
            }
            _ => {
                self.agent_memory_used_bytes.set(f64::NAN);
                self.agent_memory_total_bytes.set(f64::NAN);
                self.agent_memory_usage_percent.set(f64::NAN);
            }
        }

        self.agent_disk_used_bytes.reset();
        self.agent_disk_total_bytes.reset();
        self.agent_disk_usage_percent.reset();
        let partitions = s.disks.value().map(Vec::as_slice).unwrap_or_default();
        for p in partitions {
            let labels = [p.mount_point.as_str(), p.device_id.as_str()];
            if let MetricReading::Value(d) = &p.usage {
                self.agent_disk_used_bytes
                    .with_label_values(&labels)
                    .set(d.used_bytes as f64);
                self.agent_disk_total_bytes
                    .with_label_values(&labels)
                    .set(d.total_bytes as f64);
                self.agent_disk_usage_percent
                    .with_label_values(&labels)
                    .set(d.percent);
            }
        }
        self.agent_disk_count.set(partitions.len() as f64);

        self.agent_temperature_celsius
            .set(s.temperature_celsius.value().copied().unwrap_or(f64::NAN));

        let r = &report.rates;
        self.agent_net_tx_bytes_per_sec.set(r.bytes_sent_per_sec);
        self.agent_net_rx_bytes_per_sec.set(r.bytes_recv_per_sec);
        self.agent_net_tx_packets_per_sec.set(r.packets_sent_per_sec);
        self.agent_net_rx_packets_per_sec.set(r.packets_recv_per_sec);
        if r.status == RateStatus::CounterReset {
            self.agent_net_counter_resets_total.inc();
        }

        self.agent_metric_severity.reset();
        for c in &report.classifications {
            let metric = c.metric.to_string();
            self.agent_metric_severity
                .with_label_values(&[metric.as_str()])
                .set(severity_value(c.severity));
        }

        self.agent_alerts_active.set(report.alerts.len() as f64);
        for a in &report.alerts {
            self.agent_alerts_total
                .with_label_values(&[a.severity.as_str()])
                .inc();
        }
    }

    pub fn inc_cycle_failure(&self) {
        self.agent_cycle_failures_total.inc();
    }

    pub fn inc_scrape_count(&self) {
        self.agent_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn severity_value(severity: Severity) -> f64 {
    match severity {
        Severity::Normal => 0.0,
        Severity::Warning => 1.0,
        Severity::Critical => 2.0,
        Severity::Unavailable => -1.0,
        Severity::Error => -2.0,
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    latest: LatestReport,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<Metrics>, latest: LatestReport) -> Self {
        Self { metrics, latest }
    }
}

#[async_trait]
impl Reporter for MetricsReporter {
    async fn deliver(&mut self, report: &HealthReport) -> Result<(), ReportError> {
        self.metrics.update_from_report(report);
        *self.latest.write().await = Some(report.clone());
        Ok(())
    }

    async fn cycle_failed(&mut self, _error: &SourceError) {
        self.metrics.inc_cycle_failure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{aggregate_alerts, classify_snapshot, ThresholdConfig};
    use crate::collectors::{CpuStat, DiskPartition, DiskUsage, Snapshot};
    use crate::rates::RateSample;
    use crate::report::build_report;
    use tokio::time::Instant;

    fn report() -> HealthReport {
        let mut s = Snapshot::unavailable(Instant::now(), 0);
        s.cpu = MetricReading::Value(CpuStat {
            usage_percent: 92.0,
            core_count: 8,
        });
        s.disks = MetricReading::Value(vec![DiskPartition {
            device_id: "nvme0n1p2".to_string(),
            mount_point: "/".to_string(),
            usage: MetricReading::Value(DiskUsage::new(1000, 500)),
        }]);
        let classes = classify_snapshot(&s, &ThresholdConfig::default());
        let alerts = aggregate_alerts(&classes);
        build_report(1, 1_700_000_000, s, RateSample::zero(RateStatus::CounterReset), classes, alerts)
    }

    fn encoded(metrics: &Metrics) -> String {
        String::from_utf8(metrics.encode_metrics().expect("кодирование метрик"))
            .expect("utf-8")
    }

    #[test]
    fn report_updates_gauges() {
        let metrics = Metrics::new().expect("инициализация метрик");
        metrics.update_from_report(&report());

        assert_eq!(metrics.agent_cpu_usage_percent.get(), 92.0);
        assert_eq!(metrics.agent_alerts_active.get(), 1.0);
        assert_eq!(metrics.agent_net_counter_resets_total.get(), 1.0);
        assert_eq!(
            metrics
                .agent_metric_severity
                .with_label_values(&["cpu"])
                .get(),
            2.0
        );

        let text = encoded(&metrics);
        assert!(text.contains("agent_disk_usage_percent{device=\"nvme0n1p2\",mount=\"/\"} 50"));
        assert!(text.contains("agent_cycles_total 1"));
    }

    #[tokio::test]
    async fn reporter_keeps_latest_report() {
        let metrics = Metrics::new().expect("инициализация метрик");
        let latest: LatestReport = Arc::new(RwLock::new(None));
        let mut reporter = MetricsReporter::new(metrics.clone(), latest.clone());

        reporter.deliver(&report()).await.expect("доставка");
        reporter
            .cycle_failed(&SourceError::Exhausted("тест".to_string()))
            .await;

        assert_eq!(latest.read().await.as_ref().map(|r| r.cycle), Some(1));
        assert_eq!(metrics.agent_cycle_failures_total.get(), 1.0);
    }

    #[test]
    fn unreadable_metrics_do_not_keep_last_value() {
        let metrics = Metrics::new().expect("инициализация метрик");

        let mut good = report();
        good.snapshot.cpu = MetricReading::Value(CpuStat {
            usage_percent: 97.0,
            core_count: 4,
        });
        good.snapshot.temperature_celsius = MetricReading::Value(85.0);
        metrics.update_from_report(&good);
        assert_eq!(metrics.agent_cpu_usage_percent.get(), 97.0);
        assert_eq!(metrics.agent_temperature_celsius.get(), 85.0);

        let mut failed = report();
        failed.snapshot.cpu = MetricReading::Failed("нет данных".to_string());
        failed.snapshot.temperature_celsius = MetricReading::Unavailable;
        metrics.update_from_report(&failed);

        assert!(metrics.agent_cpu_usage_percent.get().is_nan());
        assert!(metrics.agent_cpu_core_count.get().is_nan());
        assert!(metrics.agent_temperature_celsius.get().is_nan());
        assert!(metrics.agent_memory_usage_percent.get().is_nan());
        assert!(encoded(&metrics).contains("agent_cpu_usage_percent NaN"));
    }
}
