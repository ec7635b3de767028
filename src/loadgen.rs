//! Synthetic traffic: phased per-tenant load against a running platform
//! edge.
//!
//! Each phase drives one tenant at a configured concurrency and QPS for a
//! fixed duration. The client is a deliberately plain blocking HTTP/1.1
//! GET over `TcpStream`; the platform under test is the interesting part.

use crate::scope::Scope;
use crate::util::error::ConfigError;
use log::{info, warn};
use serde::Deserialize;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadPhase {
    pub tenant_id: u64,
    #[serde(default)]
    pub start_after_ms: u64,
    /// Zero means "run until stopped".
    #[serde(default)]
    pub duration_ms: u64,
    pub concurrency: usize,
    pub qps: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct LoadPlan {
    pub phases: Vec<LoadPhase>,
}

impl LoadPlan {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let plan: LoadPlan = serde_json::from_str(&raw)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for phase in &self.phases {
            if phase.concurrency == 0 {
                return Err(ConfigError::Invalid {
                    reason: format!("phase for tenant {} has zero concurrency", phase.tenant_id),
                });
            }
            if phase.qps <= 0.0 {
                return Err(ConfigError::Invalid {
                    reason: format!("phase for tenant {} has non-positive qps", phase.tenant_id),
                });
            }
        }
        Ok(())
    }
}

/// Aggregate outcome counters across all phases.
#[derive(Debug, Default)]
pub struct GeneratorReport {
    pub sent: AtomicU64,
    pub succeeded: AtomicU64,
    pub shed: AtomicU64,
    pub failed: AtomicU64,
}

impl GeneratorReport {
    pub fn summary(&self) -> String {
        format!(
            "sent={} succeeded={} shed={} failed={}",
            self.sent.load(Ordering::Relaxed),
            self.succeeded.load(Ordering::Relaxed),
            self.shed.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

pub struct Generator {
    /// `host:port` of the platform edge.
    pub target: String,
    pub plan: LoadPlan,
}

impl Generator {
    /// Runs every phase to completion (or until `stop` is raised) and
    /// returns the aggregate counters. Blocks the caller.
    pub fn run(&self, stop: Arc<AtomicBool>) -> Arc<GeneratorReport> {
        let report = Arc::new(GeneratorReport::default());
        let mut phase_threads = Vec::new();

        for phase in self.plan.phases.clone() {
            let target = self.target.clone();
            let stop = stop.clone();
            let report = report.clone();
            phase_threads.push(thread::spawn(move || {
                run_phase(&target, &phase, &stop, &report);
            }));
        }
        for handle in phase_threads {
            let _ = handle.join();
        }
        report
    }
}

fn run_phase(target: &str, phase: &LoadPhase, stop: &Arc<AtomicBool>, report: &Arc<GeneratorReport>) {
    let scope = Scope::new(phase.tenant_id);
    if !sleep_unless_stopped(Duration::from_millis(phase.start_after_ms), stop) {
        return;
    }
    info!(
        "event=load_phase_started scope={scope} qps={} concurrency={}",
        phase.qps, phase.concurrency
    );

    let deadline = if phase.duration_ms == 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(phase.duration_ms))
    };
    // Total phase QPS is split evenly across its client threads.
    let per_client_interval =
        Duration::from_secs_f64(phase.concurrency as f64 / phase.qps.max(f64::MIN_POSITIVE));

    let mut clients = Vec::with_capacity(phase.concurrency);
    for _ in 0..phase.concurrency {
        let target = target.to_string();
        let stop = stop.clone();
        let report = report.clone();
        clients.push(thread::spawn(move || {
            run_client(&target, scope, per_client_interval, deadline, &stop, &report);
        }));
    }
    for client in clients {
        let _ = client.join();
    }
    info!("event=load_phase_finished scope={scope}");
}

fn run_client(
    target: &str,
    scope: Scope,
    interval: Duration,
    deadline: Option<Instant>,
    stop: &Arc<AtomicBool>,
    report: &Arc<GeneratorReport>,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return;
            }
        }
        let started = Instant::now();
        report.sent.fetch_add(1, Ordering::Relaxed);
        match issue_request(target, scope) {
            Ok(200) => {
                report.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Ok(429) => {
                report.shed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(status) => {
                warn!("event=load_unexpected_status scope={scope} status={status}");
                report.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!("event=load_request_failed scope={scope} error={err}");
                report.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        let elapsed = started.elapsed();
        if elapsed < interval && !sleep_unless_stopped(interval - elapsed, stop) {
            return;
        }
    }
}

/// One blocking GET; returns the response status code.
fn issue_request(target: &str, scope: Scope) -> std::io::Result<u16> {
    let mut stream = TcpStream::connect(target)?;
    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
    stream.set_write_timeout(Some(CLIENT_TIMEOUT))?;
    let request = format!(
        "GET /shop/{} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        scope.tenant_id, target
    );
    stream.write_all(request.as_bytes())?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    parse_status(&response).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "unparseable response head")
    })
}

fn parse_status(response: &[u8]) -> Option<u16> {
    let head = response.split(|byte| *byte == b'\r').next()?;
    let head = std::str::from_utf8(head).ok()?;
    head.split_whitespace().nth(1)?.parse().ok()
}

fn sleep_unless_stopped(duration: Duration, stop: &Arc<AtomicBool>) -> bool {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        thread::sleep(remaining.min(Duration::from_millis(50)));
    }
    !stop.load(Ordering::Relaxed)
}
