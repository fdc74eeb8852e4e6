use crate::classify::{aggregate_alerts, classify_snapshot, ThresholdConfig};
use crate::collectors::{now_unix, MetricReading, MetricSource, SourceError};
use crate::config::ConfigError;
use crate::rates::RateCalculator;
use crate::report::build_report;
use crate::reporter::Reporter;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub interval: Duration,
    pub duration: Option<Duration>,
    pub run_once: bool,
}

impl LoopSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Validation(
                "интервал опроса должен быть > 0".to_string(),
            ));
        }
        if self.duration.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Validation(
                "длительность мониторинга должна быть > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Sampling,
    RateComputing,
    Classifying,
    Reporting,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
}

/// Drives sample → rates → classify → report on a fixed schedule.
///
/// Cycles run strictly one after another. The stop signal (`true` on the
/// watch channel) is observed before each sampling pass and while sleeping;
/// a signal raised during `MetricSource::sample` takes effect once that call
/// returns and the cycle has been reported.
pub struct SamplingLoop<S, R> {
    settings: LoopSettings,
    thresholds: ThresholdConfig,
    source: S,
    reporter: R,
    rates: RateCalculator,
    shutdown: watch::Receiver<bool>,
    state: LoopState,
    last_sample_at: Option<Instant>,
    cycle: u64,
}

impl<S: MetricSource, R: Reporter> SamplingLoop<S, R> {
    pub fn new(
        settings: LoopSettings,
        thresholds: ThresholdConfig,
        source: S,
        reporter: R,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let window = source.measurement_window();
        if !settings.run_once && window >= settings.interval {
            warn!(
                window_ms = window.as_millis() as u64,
                interval_ms = settings.interval.as_millis() as u64,
                "окно замера не меньше интервала, циклы пойдут без пауз"
            );
        }
        Ok(Self {
            settings,
            thresholds,
            source,
            reporter,
            rates: RateCalculator::new(),
            shutdown,
            state: LoopState::Idle,
            last_sample_at: None,
            cycle: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub async fn run(&mut self) -> RunSummary {
        let started = Instant::now();
        let mut scheduled = started;
        let mut summary = RunSummary::default();
        info!(
            interval_secs = self.settings.interval.as_secs_f64(),
            duration_secs = ?self.settings.duration.map(|d| d.as_secs_f64()),
            run_once = self.settings.run_once,
            "запуск цикла мониторинга"
        );

        loop {
            if self.stop_requested() {
                info!("получен сигнал остановки цикла мониторинга");
                break;
            }

            match self.run_cycle().await {
                Ok(()) => summary.cycles_completed += 1,
                Err(err) => {
                    summary.cycles_failed += 1;
                    error!(cycle = self.cycle, error = %err, "цикл завершился без отчёта");
                    self.reporter.cycle_failed(&err).await;
                }
            }

            if self.settings.run_once {
                break;
            }

            scheduled = next_start(scheduled, self.settings.interval, Instant::now());
            if let Some(limit) = self.settings.duration {
                if scheduled.saturating_duration_since(started) >= limit {
                    info!(
                        cycles = summary.cycles_completed,
                        "заданная длительность мониторинга истекла"
                    );
                    break;
                }
            }

            self.transition(LoopState::Sleeping);
            if self.sleep_until(scheduled).await {
                info!("получен сигнал остановки во время ожидания");
                break;
            }
        }

        self.transition(LoopState::Stopped);
        info!(
            completed = summary.cycles_completed,
            failed = summary.cycles_failed,
            "мониторинг остановлен"
        );
        summary
    }

    async fn run_cycle(&mut self) -> Result<(), SourceError> {
        self.cycle += 1;

        self.transition(LoopState::Sampling);
        let snapshot = self.source.sample().await?;

        self.transition(LoopState::RateComputing);
        let elapsed = self
            .last_sample_at
            .map(|prev| snapshot.taken_at.saturating_duration_since(prev).as_secs_f64())
            .unwrap_or(0.0);
        self.last_sample_at = Some(snapshot.taken_at);
        let rates = match &snapshot.network {
            MetricReading::Value(counters) => self.rates.update(*counters, elapsed),
            _ => self.rates.mark_unavailable(),
        };
        trace!(
            cycle = self.cycle,
            elapsed_secs = elapsed,
            status = ?rates.status,
            measured = rates.is_measured(),
            baseline = self.rates.has_baseline(),
            "скорость сети рассчитана"
        );

        self.transition(LoopState::Classifying);
        let classifications = classify_snapshot(&snapshot, &self.thresholds);
        let alerts = aggregate_alerts(&classifications);

        self.transition(LoopState::Reporting);
        let report = build_report(
            self.cycle,
            now_unix(),
            snapshot,
            rates,
            classifications,
            alerts,
        );
        for c in report.degraded() {
            warn!(
                cycle = self.cycle,
                metric = %c.metric,
                reason = c.detail.as_deref().unwrap_or(""),
                "не удалось прочитать метрику"
            );
        }
        debug!(
            cycle = self.cycle,
            worst = ?report.worst_severity(),
            alerts = report.alerts.len(),
            "отчёт сформирован"
        );
        if let Err(err) = self.reporter.deliver(&report).await {
            warn!(cycle = self.cycle, error = %err, "репортер вернул ошибку");
        }
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) -> bool {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        // Sender is gone, nobody can stop us any more.
                        (&mut sleep).await;
                        return false;
                    }
                    if *self.shutdown.borrow() {
                        return true;
                    }
                }
            }
        }
    }

    fn transition(&mut self, next: LoopState) {
        trace!(cycle = self.cycle, from = ?self.state, to = ?next, "переход состояния");
        self.state = next;
    }
}

fn next_start(scheduled: Instant, interval: Duration, now: Instant) -> Instant {
    let nominal = scheduled + interval;
    if nominal >= now {
        nominal
    } else {
        debug!(
            overrun_ms = now.duration_since(nominal).as_millis() as u64,
            "цикл не уложился в интервал"
        );
        now
    }
}
