use crate::collectors::NetCounters;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateStatus {
    Baseline,
    Measured,
    CounterReset,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateSample {
    pub bytes_sent_per_sec: f64,
    pub bytes_recv_per_sec: f64,
    pub packets_sent_per_sec: f64,
    pub packets_recv_per_sec: f64,
    pub elapsed_secs: f64,
    pub status: RateStatus,
}

impl RateSample {
    pub fn zero(status: RateStatus) -> Self {
        Self {
            bytes_sent_per_sec: 0.0,
            bytes_recv_per_sec: 0.0,
            packets_sent_per_sec: 0.0,
            packets_recv_per_sec: 0.0,
            elapsed_secs: 0.0,
            status,
        }
    }

    pub fn is_measured(&self) -> bool {
        matches!(self.status, RateStatus::Measured | RateStatus::CounterReset)
    }
}

#[derive(Debug, Default)]
pub struct RateCalculator {
    previous: Option<NetCounters>,
}

impl RateCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, counters: NetCounters, elapsed_secs: f64) -> RateSample {
        let Some(prev) = self.previous.replace(counters) else {
            return RateSample::zero(RateStatus::Baseline);
        };
        if !elapsed_secs.is_finite() || elapsed_secs <= 0.0 {
            return RateSample::zero(RateStatus::Baseline);
        }

        let (bytes_sent, r1) = per_sec(prev.bytes_sent, counters.bytes_sent, elapsed_secs);
        let (bytes_recv, r2) = per_sec(prev.bytes_recv, counters.bytes_recv, elapsed_secs);
        let (packets_sent, r3) =
            per_sec(prev.packets_sent, counters.packets_sent, elapsed_secs);
        let (packets_recv, r4) =
            per_sec(prev.packets_recv, counters.packets_recv, elapsed_secs);

        RateSample {
            bytes_sent_per_sec: bytes_sent,
            bytes_recv_per_sec: bytes_recv,
            packets_sent_per_sec: packets_sent,
            packets_recv_per_sec: packets_recv,
            elapsed_secs,
            status: if r1 || r2 || r3 || r4 {
                RateStatus::CounterReset
            } else {
                RateStatus::Measured
            },
        }
    }

    pub fn mark_unavailable(&mut self) -> RateSample {
        self.previous = None;
        RateSample::zero(RateStatus::Unavailable)
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }
}

fn per_sec(prev: u64, current: u64, elapsed_secs: f64) -> (f64, bool) {
    match current.checked_sub(prev) {
        Some(delta) => (delta as f64 / elapsed_secs, false),
        None => (0.0, true),
    }
}
