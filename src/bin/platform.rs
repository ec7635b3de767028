use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use loadgate::config::PlatformConfig;
use loadgate::edge::{EdgeConfig, SimulationEdge};
use loadgate::pool::{DelayedResponder, PoolConfig, WorkerPool};
use loadgate::telemetry::MetricsHandle;
use log::info;
use std::io::Write;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
struct Cli {
    /// Path to the platform configuration JSON
    #[arg(long)]
    config: PathBuf,

    /// Stop after this many seconds instead of running until killed
    #[arg(long)]
    run_for_secs: Option<u64>,

    /// env_logger-style filter string (e.g. "info,loadgate=debug"); overrides RUST_LOG/defaults
    #[arg(long)]
    log_filter: Option<String>,
}

const DEFAULT_LOG_FILTER: &str = "info,loadgate=info";

fn init_logging(cli_filter: Option<&str>) {
    let env = Env::default().default_filter_or(DEFAULT_LOG_FILTER);
    let mut builder = env_logger::Builder::from_env(env);
    if let Some(filter) = cli_filter {
        builder.parse_filters(filter);
    }
    builder.format_timestamp_secs();
    builder.format(|buf, record| {
        let ts = buf.timestamp();
        writeln!(
            buf,
            "[{} {:<5} {}] {}",
            ts,
            record.level(),
            record.target(),
            record.args()
        )
    });
    builder.init();
}

/// Blocks until an interrupt arrives or, when set, `run_for` elapses.
fn wait_for_stop(interrupt: &Receiver<()>, run_for: Option<Duration>) {
    match run_for {
        Some(limit) => match interrupt.recv_timeout(limit) {
            Ok(()) | Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        },
        None => {
            let _ = interrupt.recv();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_filter.as_deref());

    let (interrupt_tx, interrupt) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })
    .context("installing interrupt handler")?;

    let config = PlatformConfig::load(&cli.config)
        .with_context(|| format!("loading platform config from {}", cli.config.display()))?;

    let metrics = MetricsHandle::new("platform");
    let controller = config.strategy.build_controller(&metrics);

    let responder = Arc::new(DelayedResponder {
        response_time: config.worker_response_time(),
    });
    let mut pool = WorkerPool::start(
        PoolConfig {
            num_workers: config.num_workers,
            max_rps_per_worker: config.max_rps_per_worker,
            queue_capacity: config.queue_capacity,
        },
        responder,
        metrics.clone(),
    );

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .with_context(|| format!("binding edge listener on port {}", config.port))?;
    let mut edge = SimulationEdge::start(
        listener,
        pool.pool(),
        controller,
        EdgeConfig {
            max_connections: config.max_connections,
            feedback_delay: config.feedback_delay(),
        },
        metrics.clone(),
    )
    .context("starting simulation edge")?;

    info!(
        "event=platform_started port={} workers={} max_rps_per_worker={}",
        config.port, config.num_workers, config.max_rps_per_worker
    );

    wait_for_stop(&interrupt, cli.run_for_secs.map(Duration::from_secs));

    info!("event=platform_stopping");
    edge.shutdown();
    pool.shutdown();

    let snapshot = metrics.snapshot();
    info!(
        "event=platform_stopped passed={} dropped={}",
        snapshot.counter("platform.edge.passed"),
        snapshot.counter("platform.edge.dropped")
    );
    Ok(())
}
