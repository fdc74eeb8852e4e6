use crate::classify::{AlertEvent, Classification, MetricId, Severity};
use crate::collectors::Snapshot;
use crate::rates::RateSample;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub cycle: u64,
    pub cycle_timestamp_unix: i64,
    pub snapshot: Snapshot,
    pub rates: RateSample,
    pub classifications: Vec<Classification>,
    pub alerts: Vec<AlertEvent>,
}

pub fn build_report(
    cycle: u64,
    cycle_timestamp_unix: i64,
    snapshot: Snapshot,
    rates: RateSample,
    classifications: Vec<Classification>,
    alerts: Vec<AlertEvent>,
) -> HealthReport {
    HealthReport {
        cycle,
        cycle_timestamp_unix,
        snapshot,
        rates,
        classifications,
        alerts,
    }
}

impl HealthReport {
    pub fn severity_of(&self, metric: &MetricId) -> Option<Severity> {
        self.classifications
            .iter()
            .find(|c| &c.metric == metric)
            .map(|c| c.severity)
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.classifications
            .iter()
            .map(|c| c.severity)
            .filter(|s| s.level().is_some())
            .max_by_key(|s| s.level())
    }

    pub fn has_alerts(&self) -> bool {
        !self.alerts.is_empty()
    }

    pub fn degraded(&self) -> impl Iterator<Item = &Classification> {
        self.classifications
            .iter()
            .filter(|c| c.severity == Severity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{aggregate_alerts, classify_snapshot, ThresholdConfig};
    use crate::collectors::{CpuStat, MetricReading};
    use crate::rates::RateStatus;
    use tokio::time::Instant;

    fn report(cpu: MetricReading<CpuStat>) -> HealthReport {
        let mut snapshot = Snapshot::unavailable(Instant::now(), 1_700_000_000);
        snapshot.cpu = cpu;
        let classifications = classify_snapshot(&snapshot, &ThresholdConfig::default());
        let alerts = aggregate_alerts(&classifications);
        build_report(
            3,
            1_700_000_001,
            snapshot,
            RateSample::zero(RateStatus::Baseline),
            classifications,
            alerts,
        )
    }

    #[test]
    fn assembles_all_parts() {
        let r = report(MetricReading::Value(CpuStat {
            usage_percent: 85.0,
            core_count: 4,
        }));
        assert_eq!(r.cycle, 3);
        assert_eq!(r.cycle_timestamp_unix, 1_700_000_001);
        assert_eq!(r.severity_of(&MetricId::Cpu), Some(Severity::Warning));
        assert_eq!(r.worst_severity(), Some(Severity::Warning));
        assert!(r.has_alerts());
        assert_eq!(r.rates.status, RateStatus::Baseline);
    }

    #[test]
    fn worst_severity_ignores_unreadable_metrics() {
        let r = report(MetricReading::Failed("нет доступа".to_string()));
        assert_eq!(r.worst_severity(), None);
        assert_eq!(r.degraded().count(), 1);
        assert!(!r.has_alerts());
    }

    #[test]
    fn serializes_to_json() {
        let r = report(MetricReading::Value(CpuStat {
            usage_percent: 12.5,
            core_count: 2,
        }));
        let json = serde_json::to_value(&r).expect("отчёт сериализуется");
        assert_eq!(json["snapshot"]["cpu"]["status"], "value");
        assert_eq!(json["snapshot"]["cpu"]["value"]["usage_percent"], 12.5);
        assert_eq!(json["classifications"][0]["severity"], "normal");
        assert_eq!(json["rates"]["status"], "baseline");
    }
}
