mod classify;
mod collectors;
mod config;
mod http;
mod metrics;
mod rates;
mod report;
mod reporter;
mod sampler;

use axum::serve;
use clap::Parser;
use collectors::system::SystemSource;
use config::{Config, ConfigError};
use metrics::{LatestReport, Metrics, MetricsReporter};
use reporter::{ConsoleReporter, FanoutReporter, LogReporter};
use sampler::SamplingLoop;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "healthwatch")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    #[arg(short = 'o', long)]
    once: bool,
    #[arg(short, long)]
    interval: Option<humantime::Duration>,
    #[arg(short, long)]
    duration: Option<humantime::Duration>,
    #[arg(long)]
    log_file: Option<String>,
    #[arg(long)]
    listen: Option<String>,
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_or_default(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    if let Err(err) = apply_cli_overrides(&mut cfg, &cli).and_then(|()| cfg.validate()) {
        error!(error = %err, "некорректные параметры запуска");
        std::process::exit(1);
    }

    let thresholds = match cfg.thresholds.build() {
        Ok(t) => t,
        Err(err) => {
            error!(error = %err, "некорректные пороги");
            std::process::exit(1);
        }
    };
    for (metric, t) in thresholds.iter() {
        debug!(metric, warning = t.warning, critical = t.critical, "порог");
    }

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };
    let latest: LatestReport = Arc::new(RwLock::new(None));

    let mut console = ConsoleReporter::new(cfg.console);
    if let Some(path) = &cfg.log_file {
        console = match console.with_log_file(path) {
            Ok(c) => c,
            Err(err) => {
                error!(error = %err, "не удалось открыть файл журнала");
                std::process::exit(1);
            }
        };
    }
    let reporter = FanoutReporter::new()
        .with(LogReporter)
        .with(console)
        .with(MetricsReporter::new(metrics.clone(), latest.clone()));

    info!(
        interval_secs = cfg.interval_secs,
        duration_secs = ?cfg.duration_secs,
        run_once = cfg.run_once,
        listen = ?cfg.listen,
        reporters = reporter.len(),
        "запуск healthwatch"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = cfg
        .listen
        .clone()
        .map(|listen| spawn_http(listen, metrics.clone(), latest.clone(), shutdown_rx.clone()));

    let source = SystemSource::new(cfg.cpu_window(), cfg.top_processes);
    let mut sampling = match SamplingLoop::new(
        cfg.loop_settings(),
        thresholds,
        source,
        reporter,
        shutdown_rx.clone(),
    ) {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "не удалось запустить цикл опроса");
            std::process::exit(1);
        }
    };

    let ctrl_c_task = {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "не удалось дождаться Ctrl+C");
                return;
            }
            info!("получен Ctrl+C, выполняется остановка");
            let _ = shutdown_tx.send(true);
        })
    };

    let summary = sampling.run().await;
    info!(
        cycles_completed = summary.cycles_completed,
        cycles_failed = summary.cycles_failed,
        state = ?sampling.state(),
        "мониторинг завершён"
    );

    let _ = shutdown_tx.send(true);
    ctrl_c_task.abort();
    if let Some(task) = http_task {
        let _ = task.await;
    }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) -> Result<(), ConfigError> {
    if cli.once {
        cfg.run_once = true;
    }
    if let Some(interval) = &cli.interval {
        cfg.interval_secs = whole_seconds("--interval", interval)?;
    }
    if let Some(duration) = &cli.duration {
        cfg.duration_secs = Some(whole_seconds("--duration", duration)?);
    }
    if let Some(path) = &cli.log_file {
        cfg.log_file = Some(path.clone());
    }
    if let Some(listen) = &cli.listen {
        cfg.listen = Some(listen.clone());
    }
    if cli.quiet {
        cfg.console = false;
    }
    Ok(())
}

fn whole_seconds(flag: &str, value: &humantime::Duration) -> Result<u64, ConfigError> {
    if value.subsec_nanos() != 0 {
        return Err(ConfigError::Validation(format!(
            "{flag} должно быть целым числом секунд, получено {value}"
        )));
    }
    Ok(value.as_secs())
}

fn spawn_http(
    listen: String,
    metrics: Arc<Metrics>,
    latest: LatestReport,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = http::build_router(metrics, latest);
        let addr: SocketAddr = match listen.parse() {
            Ok(addr) => addr,
            Err(err) => {
                error!(error = %err, listen = %listen, "некорректный адрес listen");
                return;
            }
        };

        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(err) => {
                error!(error = %err, "не удалось запустить HTTP-сервер");
                return;
            }
        };
        info!(%addr, "HTTP-сервер запущен");

        let server = serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });

        if let Err(err) = server.await {
            error!(error = %err, "ошибка HTTP-сервера");
        }
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let cli = Cli::parse_from([
            "healthwatch",
            "--once",
            "-i",
            "10s",
            "-d",
            "2m",
            "--listen",
            "127.0.0.1:9108",
            "--quiet",
        ]);
        let mut cfg = Config::default();
        apply_cli_overrides(&mut cfg, &cli).expect("переопределения применяются");

        assert!(cfg.run_once);
        assert_eq!(cfg.interval_secs, 10);
        assert_eq!(cfg.duration_secs, Some(120));
        assert_eq!(cfg.listen.as_deref(), Some("127.0.0.1:9108"));
        assert!(!cfg.console);
        cfg.validate().expect("валидные параметры");
    }

    #[test]
    fn fractional_seconds_are_rejected() {
        for args in [
            ["healthwatch", "--interval", "1500ms"],
            ["healthwatch", "--duration", "2500ms"],
            ["healthwatch", "--interval", "500ms"],
        ] {
            let cli = Cli::parse_from(args);
            let mut cfg = Config::default();
            assert!(matches!(
                apply_cli_overrides(&mut cfg, &cli),
                Err(ConfigError::Validation(_))
            ));
            assert_eq!(cfg.interval_secs, 5);
            assert_eq!(cfg.duration_secs, None);
        }
    }

    #[test]
    fn override_fixes_invalid_file_interval() {
        let mut cfg = Config::from_yaml("interval_secs: 0\n").expect("yaml");
        assert!(cfg.validate().is_err());

        let cli = Cli::parse_from(["healthwatch", "-i", "5s"]);
        apply_cli_overrides(&mut cfg, &cli).expect("переопределения применяются");
        cfg.validate().expect("интервал исправлен флагом");
        assert_eq!(cfg.interval_secs, 5);
    }
}
