//! hermes binary

use actix_web::{App, HttpServer, web};
use hermes::server::{self, AppState};
use hermes::instrumentation;
use hermes::{BatchPipeline, Config, HecSink, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    initialize_tracing();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting hermes");

    let config = Config::from_env();

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!(
        api_port = config.api_port,
        metrics_port = config.metrics_port,
        max_batch_count = config.max_batch_count,
        max_batch_size = config.max_batch_size,
        max_batch_delay_ms = config.max_batch_delay.as_millis() as u64,
        queue_capacity = config.queue_capacity,
        "Server configuration"
    );

    let metrics_handle = web::Data::new(instrumentation::install_recorder()?);

    let sink = Arc::new(HecSink::new(
        config.splunk_endpoint.clone(),
        config.splunk_token.clone(),
        config.http_timeout,
    )?);

    if config.splunk_endpoint.is_none() || config.splunk_token.is_none() {
        warn!("SPLUNK_ENDPOINT or SPLUNK_TOKEN not set, the first delivery will halt the batcher");
    } else if !sink.test_connectivity().await {
        warn!("Collector connectivity test failed, but continuing anyway");
    }

    let pipeline = BatchPipeline::from_config(&config, Arc::clone(&sink));
    let state = web::Data::new(AppState::new(pipeline.queue()));

    info!(addr = %format!("0.0.0.0:{}", config.metrics_port), "Metrics server starting");

    let metrics_server = HttpServer::new(move || {
        App::new()
            .app_data(metrics_handle.clone())
            .configure(server::configure_metrics)
    })
    .bind(("0.0.0.0", config.metrics_port))?
    .workers(1)
    .disable_signals()
    .run();
    let metrics_server_handle = metrics_server.handle();
    actix_web::rt::spawn(metrics_server);

    info!(addr = %format!("0.0.0.0:{}", config.api_port), "Main server starting");

    // SIGINT/SIGTERM stop the server; the pipeline is drained afterwards
    HttpServer::new(move || App::new().app_data(state.clone()).configure(server::configure))
        .bind(("0.0.0.0", config.api_port))?
        .shutdown_timeout(5)
        .run()
        .await?;

    info!("Server stopped, draining batcher");
    pipeline.shutdown().await?;
    metrics_server_handle.stop(true).await;

    let metrics = sink.metrics().await;
    info!(
        attempts = metrics.attempts,
        accepted = metrics.accepted,
        rejected = metrics.rejected,
        failed = metrics.failed,
        success_rate = metrics.success_rate,
        avg_duration_ms = metrics.avg_duration_ms,
        "Final delivery metrics"
    );

    info!("hermes shutdown complete");
    Ok(())
}

/// Initialize structured logging.
///
/// `RUST_LOG` wins over `LOG_LEVEL`; `LOG_FORMAT=text` switches off JSON output.
fn initialize_tracing() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter_layer);

    if log_format.eq_ignore_ascii_case("text") {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(false)
                    .with_line_number(false)
                    .json(),
            )
            .init();
    }
}
