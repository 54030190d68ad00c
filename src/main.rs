//! Gate access service - live plate detection and entry/exit logging
//!
//! Module structure:
//! - `domain/` - Core types (Vehicle, AccessLogEntry, PlateToken)
//! - `io/` - External interfaces (camera, models, stores, SMS, HTTP)
//! - `services/` - Detection loop, access pipeline, notifications
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use gate_access::domain::SystemClock;
use gate_access::infra::{Config, Metrics};
use gate_access::io::{
    start_http_server, CaptureWriter, FileVehicleRegistry, HttpSmsGateway, HttpState, JsonlAccessLog,
    JsonlNotificationSink, SmsGateway,
};
use gate_access::services::{
    create_notifier, feed_channel, latest_scan_channel, AccessPipeline, ConfigSessionProvider,
    DetectionLoop, DetectionSession, ImageScanner, LoopSettings, NoticeText, PipelineDeps,
    PipelineSettings, FEED_BUFFER_FRAMES,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Gate access service - plate detection, access logging, owner notification
#[derive(Parser, Debug)]
#[command(name = "gate-access", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default: INFO, use RUST_LOG=debug for per-plate outcomes
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("gate-access starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        gate = %config.gate_name(),
        http_port = %config.http_port(),
        frames_dir = %config.frames_dir(),
        interval_frames = %config.detection_interval_frames(),
        dwell_secs = %config.dwell_secs(),
        cooldown_secs = %config.cooldown_secs(),
        sms_enabled = %config.sms_enabled(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Stores
    let registry = Arc::new(FileVehicleRegistry::open(config.registry_file()).await?);
    let access_log = Arc::new(JsonlAccessLog::open(config.access_log_file()).await?);
    let sink = Arc::new(JsonlNotificationSink::new(config.notifications_file()));

    // Owner notifications
    let sms: Option<Arc<dyn SmsGateway>> = if config.sms_enabled() {
        if config.sms_api_key().is_empty() {
            warn!("sms_api_key_missing");
        }
        Some(Arc::new(HttpSmsGateway::new(
            config.sms_api_url(),
            config.sms_api_key(),
            config.sms_country_code(),
            Duration::from_millis(config.sms_timeout_ms()),
        )?))
    } else {
        info!("sms_disabled");
        None
    };
    let (notifier, notify_worker) = create_notifier(
        sms,
        sink,
        NoticeText { brand: config.sms_brand().to_string(), site_name: config.site_name().to_string() },
        config.notify_workers(),
        config.notify_queue_size(),
        metrics.clone(),
    );
    let notify_handle = tokio::spawn(notify_worker.run());

    // Decision pipeline
    let (latest_tx, latest_rx) = latest_scan_channel();
    let captures = config.captures_dir().map(CaptureWriter::new);
    let pipeline = AccessPipeline::new(
        PipelineSettings {
            gate_name: config.gate_name().to_string(),
            dwell: chrono::Duration::seconds(config.dwell_secs() as i64),
            cooldown: chrono::Duration::seconds(config.cooldown_secs() as i64),
        },
        PipelineDeps {
            registry: registry.clone(),
            access_log: access_log.clone(),
            notifier,
            latest: latest_tx,
            captures,
            clock: Arc::new(SystemClock),
            metrics: metrics.clone(),
        },
    );

    // Detection loop and live feed
    let session = Arc::new(DetectionSession::new(Arc::new(ConfigSessionProvider::new(&config))));
    let scanner = Arc::new(ImageScanner::new(
        session.clone(),
        LoopSettings::from_config(&config),
        config.gate_name().to_string(),
        registry,
        access_log,
        Arc::new(SystemClock),
        metrics.clone(),
    ));
    let (feed_tx, feed_rx) = feed_channel(FEED_BUFFER_FRAMES);
    let detection_loop = DetectionLoop::new(
        session,
        pipeline,
        LoopSettings::from_config(&config),
        feed_tx,
        metrics.clone(),
    );
    let loop_handle = tokio::spawn(detection_loop.run(shutdown_rx.clone()));

    // HTTP server
    let addr: SocketAddr = format!("{}:{}", config.http_bind_address(), config.http_port()).parse()?;
    let http_state = HttpState {
        site_id: Arc::new(config.site_id().to_string()),
        metrics: metrics.clone(),
        latest: latest_rx,
        feed: feed_rx,
        captures_dir: config.captures_dir().map(PathBuf::from),
        scanner: Some(scanner),
    };
    let http_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_http_server(addr, http_state, http_shutdown).await {
            error!(error = %e, "http_server_error");
        }
    });

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut metrics_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_clone.report().log(),
                _ = metrics_shutdown.changed() => break,
            }
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // The loop owns the pipeline and with it the last notification dispatcher
    match loop_handle.await {
        Ok(exit) => info!(exit = ?exit, "detection_loop_finished"),
        Err(e) => error!(error = %e, "detection_loop_panicked"),
    }
    if notify_handle.await.is_err() {
        error!("notification_worker_panicked");
    }

    // Keep serving the feed sentinel and latest scan until asked to stop
    let mut main_shutdown = shutdown_rx;
    while !*main_shutdown.borrow() {
        if main_shutdown.changed().await.is_err() {
            break;
        }
    }

    info!("gate-access shutdown complete");
    Ok(())
}
