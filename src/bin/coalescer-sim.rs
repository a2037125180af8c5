//! Simulation driver for the batch scheduler.
//!
//! Submits a burst of concurrent requests against a simulated upstream with configurable latency
//! and failure rate, waits for every result, and prints the scheduler statistics as JSON.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use coalescer::settings::{AppConfig, LogFormat};
use coalescer::upstream::{echo_batch, echo_single};
use coalescer::{
    metrics, trace, BatchScheduler, KeyWeights, RequestStatus, Upstream, UpstreamError,
};
use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "coalescer-sim")]
#[command(about = "Drive the batch scheduler against a simulated upstream")]
struct Args {
    /// Path to a TOML config file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Number of requests to submit
    #[arg(long, short = 'n', default_value = "25")]
    requests: usize,

    /// Candidate keys per request
    #[arg(long, default_value = "8")]
    keys_per_request: usize,

    /// Results kept per request
    #[arg(long, default_value = "5")]
    max_results: usize,

    /// Simulated upstream latency in milliseconds
    #[arg(long, default_value = "250")]
    latency_ms: u64,

    /// Probability in [0, 1] that an upstream call fails
    #[arg(long, default_value = "0.0")]
    failure_rate: f64,

    /// Simulate an upstream that cannot take combined calls
    #[arg(long)]
    degraded: bool,

    /// Override the trigger tick in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Serve Prometheus metrics on this address while the simulation runs
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Enable structured JSON logging
    #[arg(long)]
    structured_logging: bool,
}

/// Echoing upstream with random latency jitter and failures.
struct SimulatedUpstream {
    latency: Duration,
    failure_rate: f64,
    available: bool,
}

impl SimulatedUpstream {
    async fn call(
        &self,
        payload: &str,
        answer: fn(&str) -> String,
    ) -> Result<String, UpstreamError> {
        let (jitter, fail) = {
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0.5..1.5);
            (jitter, rng.gen_bool(self.failure_rate))
        };
        tokio::time::sleep(self.latency.mul_f64(jitter)).await;
        if fail {
            return Err(UpstreamError::Transport("simulated failure".to_string()));
        }
        Ok(answer(payload))
    }
}

#[async_trait]
impl Upstream for SimulatedUpstream {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn invoke_batch(&self, payload: &str) -> Result<String, UpstreamError> {
        self.call(payload, echo_batch).await
    }

    async fn invoke_single(&self, payload: &str) -> Result<String, UpstreamError> {
        self.call(payload, echo_single).await
    }
}

#[derive(Debug, Serialize)]
struct Report {
    completed: usize,
    failed: usize,
    elapsed_ms: u128,
    stats: coalescer::StatsSnapshot,
}

fn random_payload(rng: &mut impl Rng, keys: usize) -> KeyWeights {
    (0..keys)
        .map(|i| (format!("key-{i}-{}", rng.gen_range(0..1000)), rng.gen_range(1..100)))
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut cfg = AppConfig::load(args.config.as_deref())?;
    if args.structured_logging {
        cfg.logging.format = LogFormat::Json;
    }
    trace::init(cfg.logging.format)?;

    if !(0.0..=1.0).contains(&args.failure_rate) {
        anyhow::bail!("failure rate must be within [0, 1]");
    }
    if let Some(tick_ms) = args.tick_ms {
        cfg.scheduler.tick_interval_ms = tick_ms;
    }

    let metrics_handle = metrics::init()?;
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    if let Some(addr) = args.metrics_addr {
        let server_metrics = metrics_handle.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = metrics::run_metrics_server(addr, server_metrics, shutdown_rx).await {
                warn!(error = %e, "metrics server failed");
            }
        });
        info!(addr = %addr, "serving metrics");
    }

    let upstream = Arc::new(SimulatedUpstream {
        latency: Duration::from_millis(args.latency_ms),
        failure_rate: args.failure_rate,
        available: !args.degraded,
    });
    let scheduler = Arc::new(
        BatchScheduler::new(cfg.scheduler, &cfg.prompt, upstream, Some(metrics_handle))?
            .with_cleanup(cfg.cleanup),
    );
    scheduler.start();

    let started = std::time::Instant::now();
    let mut waiters = Vec::with_capacity(args.requests);
    for i in 0..args.requests {
        let payload = random_payload(&mut rand::thread_rng(), args.keys_per_request.max(1));
        let id = scheduler.submit_with_subject(format!("subject {i}"), payload, args.max_results)?;
        let scheduler = Arc::clone(&scheduler);
        waiters.push(tokio::spawn(async move {
            scheduler.await_result_default(&id).await
        }));
    }

    let mut completed = 0;
    let mut failed = 0;
    for waiter in waiters {
        let result = waiter.await??;
        match result.status {
            RequestStatus::Completed => completed += 1,
            _ => failed += 1,
        }
    }

    scheduler.stop();
    let _ = shutdown_tx.send(());

    let report = Report {
        completed,
        failed,
        elapsed_ms: started.elapsed().as_millis(),
        stats: scheduler.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
