use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use tokio::signal;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sluice::config::{LoggingConfig, RateLimitOptions, SluiceConfig};
use sluice::{ThrottledClient, Transport};

/// Push simulated requests through a rate limited client and report when
/// each one was let through.
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Requests admitted per window
    #[arg(long)]
    max_requests: Option<u32>,

    /// Window length in milliseconds
    #[arg(long = "per-ms")]
    per_milliseconds: Option<u64>,

    /// Requests admitted per second, overrides --max-requests and --per-ms
    #[arg(long)]
    max_rps: Option<u32>,

    /// Number of simulated requests
    #[arg(short = 'n', long)]
    requests: Option<usize>,

    /// Upper bound of the simulated request latency in milliseconds
    #[arg(long)]
    latency_ms: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut SluiceConfig) {
        if let Some(max_rps) = self.max_rps {
            config.rate_limit = RateLimitOptions::per_second(max_rps);
        } else {
            if self.max_requests.is_some() {
                config.rate_limit.max_requests = self.max_requests;
            }
            if self.per_milliseconds.is_some() {
                config.rate_limit.per_milliseconds = self.per_milliseconds;
            }
        }
        if let Some(requests) = self.requests {
            config.drill.requests = requests;
        }
        if let Some(latency_ms) = self.latency_ms {
            config.drill.latency_ms = latency_ms;
        }
    }
}

/// Transport that answers after a random delay.
struct SimulatedTransport {
    start: Instant,
    max_latency_ms: u64,
}

/// What the simulated transport saw for one request.
#[derive(Debug, Serialize)]
struct Delivery {
    sent_at_ms: u64,
    latency_ms: u64,
}

#[async_trait]
impl Transport for SimulatedTransport {
    type Request = usize;
    type Response = Delivery;
    type Error = Infallible;

    async fn send(&self, _request: usize) -> Result<Delivery, Infallible> {
        let sent_at_ms = self.start.elapsed().as_millis() as u64;
        let latency_ms = rand::thread_rng().gen_range(0..=self.max_latency_ms);
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        Ok(Delivery {
            sent_at_ms,
            latency_ms,
        })
    }
}

#[derive(Debug, Serialize)]
struct Sample {
    request: usize,
    #[serde(flatten)]
    delivery: Option<Delivery>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct Report {
    max_requests: u32,
    window_ms: u64,
    rate: f64,
    samples: Vec<Sample>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = SluiceConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    init_tracing(&config.logging);

    info!("Starting Sluice drill");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let window = config.window()?;
    info!(
        max_requests = window.max_requests(),
        window_ms = window.length().as_millis() as u64,
        requests = config.drill.requests,
        "Configuration loaded"
    );

    let transport = SimulatedTransport {
        start: Instant::now(),
        max_latency_ms: config.drill.latency_ms,
    };
    let client = Arc::new(ThrottledClient::new(transport, window));

    let handles = (0..config.drill.requests).map(|request| {
        let client = client.clone();
        tokio::spawn(async move {
            match client.send(request).await {
                Ok(delivery) => Sample {
                    request,
                    delivery: Some(delivery),
                    error: None,
                },
                Err(e) => Sample {
                    request,
                    delivery: None,
                    error: Some(e.to_string()),
                },
            }
        })
    });

    let samples = tokio::select! {
        results = join_all(handles) => results.into_iter().collect::<Result<Vec<_>, _>>()?,
        _ = shutdown_signal() => {
            warn!(
                queued = client.limiter().status().queued,
                "Drill interrupted before every request was admitted"
            );
            return Ok(());
        }
    };

    let report = Report {
        max_requests: window.max_requests(),
        window_ms: window.length().as_millis() as u64,
        rate: client.rate(),
        samples,
    };
    print_report(&report, args.json)?;

    // Let an outstanding window reset that queued work depends on run out.
    tokio::select! {
        _ = client.limiter().settled() => {}
        _ = shutdown_signal() => {}
    }

    info!("Sluice drill finished");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn print_report(report: &Report, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "{} requests, {} per {} ms ({:.2} req/s)",
        report.samples.len(),
        report.max_requests,
        report.window_ms,
        report.rate
    );
    for sample in &report.samples {
        match (&sample.delivery, &sample.error) {
            (Some(delivery), _) => println!(
                "  #{:<4} sent at {:>6} ms, took {:>4} ms",
                sample.request, delivery.sent_at_ms, delivery.latency_ms
            ),
            (None, Some(error)) => println!("  #{:<4} failed: {}", sample.request, error),
            (None, None) => println!("  #{:<4} no result", sample.request),
        }
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
