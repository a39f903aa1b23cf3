//! Entrypoint: set up tracing, connect to the platform database, start the
//! HTTP metrics & health server, and begin the periodic gather loop.
//!
//! This application uses a strongly-typed configuration (`Settings`) defined in `config.rs`,
//! which provides:
//!  - `database_url`       – Postgres connection string (read-only access is enough)
//!  - `gather_interval`    – How often to gather telemetry
//!  - `server_bind`        – HTTP bind address for metrics & health endpoints
//!  - `output_dir`         – Where dated archive directories are written
//!  - identity/license fields reported by the `config` collector

use std::net::SocketAddr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use prometheus::{Encoder, TextEncoder}; // ← bring Encoder trait into scope
use sqlx::postgres::PgPoolOptions;
use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use usage_analytics_collector::collectors::Context;
use usage_analytics_collector::config::Settings;
use usage_analytics_collector::errors::CollectError;
use usage_analytics_collector::gather::gather;
use usage_analytics_collector::metrics;

/// Application entrypoint for the usage analytics collector.
///
/// **Workflow**:
/// 1. Initialise tracing/logging from `RUST_LOG` (or default to `info`).
/// 2. Load `Config.toml` (and apply any `APP__…` env-var overrides).
/// 3. Spin up a Postgres pool against the platform database.
/// 4. Launch a background HTTP server on `/metrics` and `/healthz`.
/// 5. Enter the gather loop: every `gather_interval`, run all registered
///    collectors and the table exporter into a fresh dated archive.
#[tokio::main]
async fn main() -> Result<(), CollectError> {
    // ───────────────────────────────────────────────────────────────
    // 1. Initialise tracing / logging
    // ───────────────────────────────────────────────────────────────
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    info!("Starting usage analytics collector…");

    // ───────────────────────────────────────────────────────────────
    // 2. Load configuration
    // ───────────────────────────────────────────────────────────────
    let settings = Settings::new()?;
    info!(?settings, "Loaded configuration");

    // ───────────────────────────────────────────────────────────────
    // 3. Database pool
    // ───────────────────────────────────────────────────────────────
    //
    // The schema belongs to the platform; this service only reads it, so
    // there are no migrations to run here.
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await?;
    info!("Connected to Postgres");

    // ───────────────────────────────────────────────────────────────
    // 4. HTTP server for metrics & health
    // ───────────────────────────────────────────────────────────────
    //
    // We must set the `Content-Type` header on `/metrics` to:
    //     text/plain; version=0.0.4; charset=utf-8
    // Otherwise Prometheus (v3+) will reject the scrape.
    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .expect("Invalid `server_bind` in configuration");

    let make_svc = make_service_fn(move |_conn| {
        async move {
            Ok::<_, CollectError>(service_fn(move |req: Request<Body>| {
                async move {
                    match (req.method(), req.uri().path()) {
                        // ─── METRICS ENDPOINT ────────────────────────────────
                        (&Method::GET, "/metrics") => {
                            let metrics_text = metrics::gather_metrics();

                            let encoder = TextEncoder::new();
                            let mime = encoder.format_type();

                            let resp = Response::builder()
                                .header("Content-Type", mime)
                                .body(Body::from(metrics_text))
                                .expect("Failed to build /metrics response");

                            Ok::<Response<Body>, CollectError>(resp)
                        }

                        // ─── HEALTHCHECK ENDPOINT ───────────────────────────
                        (&Method::GET, "/healthz") => {
                            Ok::<Response<Body>, CollectError>(Response::new(Body::from("OK")))
                        }

                        // ─── ANY OTHER ROUTE ────────────────────────────────
                        _ => {
                            let not_found =
                                Response::builder().status(404).body(Body::empty()).unwrap();
                            Ok::<Response<Body>, CollectError>(not_found)
                        }
                    }
                }
            }))
        }
    });

    // Spawn the metrics & health HTTP server
    tokio::spawn(async move {
        info!(%addr, "Starting metrics & health server");
        Server::bind(&addr)
            .serve(make_svc)
            .await
            .expect("Metrics server failed");
    });

    // ───────────────────────────────────────────────────────────────
    // 5. Gather loop
    // ───────────────────────────────────────────────────────────────
    //
    // The `since` watermark lives in memory: the first run covers one
    // interval back from process start, and each completed run advances
    // it to that run's start time. Durable watermarking belongs to the
    // external shipping pipeline.
    let gather_interval = settings.gather_interval;
    let cx = Context::new(pool, settings);

    let mut since: DateTime<Utc> = Utc::now()
        - ChronoDuration::from_std(gather_interval)
            .expect("Invalid `gather_interval` in configuration");
    let mut ticker = interval(gather_interval);

    loop {
        ticker.tick().await;
        let run_started = Utc::now();
        info!(%since, "Starting gather run");

        match gather(&cx, since).await {
            Ok(report) => {
                if report.fully_successful() {
                    info!(
                        archive = %report.archive_dir.display(),
                        files = report.written.len(),
                        "Gather run complete"
                    );
                } else {
                    for (key, reason) in &report.failed_collectors {
                        warn!(collector = %key, reason = %reason, "Collector skipped this run");
                    }
                    for export in report.table_exports.iter().filter(|t| !t.is_written()) {
                        warn!(table = export.table(), "Table export failed this run");
                    }
                }
                // Advance the watermark even on partial runs: broken
                // collectors surface in the logs and metrics, and the next
                // run should not re-ship what the others already covered.
                since = run_started;
            }
            Err(e) => {
                error!(error = %e, "Gather run failed; keeping previous watermark");
            }
        }
    }
}
