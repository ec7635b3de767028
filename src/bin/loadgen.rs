use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use loadgate::loadgen::{Generator, LoadPlan};
use log::info;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug, Clone)]
struct Cli {
    /// Platform edge address as host:port
    #[arg(long, default_value = "127.0.0.1:8080")]
    target: String,

    /// Path to the load plan JSON
    #[arg(long)]
    plan: PathBuf,

    /// env_logger-style filter string; overrides RUST_LOG/defaults
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

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_filter.as_deref());

    let plan = LoadPlan::load(&cli.plan)
        .with_context(|| format!("loading load plan from {}", cli.plan.display()))?;

    info!(
        "event=loadgen_started target={} phases={}",
        cli.target,
        plan.phases.len()
    );

    let generator = Generator {
        target: cli.target,
        plan,
    };
    let stop = Arc::new(AtomicBool::new(false));
    let interrupt_stop = stop.clone();
    ctrlc::set_handler(move || {
        info!("event=loadgen_interrupted");
        interrupt_stop.store(true, Ordering::SeqCst);
    })
    .context("installing interrupt handler")?;
    let report = generator.run(stop);

    println!("{}", report.summary());
    Ok(())
}
