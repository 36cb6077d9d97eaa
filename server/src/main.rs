mod annotate;
mod detector;
mod gate;
mod health;
mod http;
mod notify;
mod pipeline;
mod policy;
mod source;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use detector::YoloDetector;
use fire_watch_common::config::Config;
use gate::{MonotonicClock, NotificationGate};
use notify::mint::MintClient;
use notify::storage::S3Storage;
use notify::{CloudNotifier, LogNotifier, NotificationSink};
use pipeline::{PipelineSettings, StreamPipeline};
use policy::SelectionPolicy;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        model = config.detector.model_path,
        confidence_threshold = config.detector.confidence_threshold,
        selection = config.detector.selection,
        cooldown_secs = config.notify.cooldown_secs,
        notify_enabled = config.notify.enabled,
        bucket = config.storage.bucket,
        "starting fire-watch"
    );

    let policy = match SelectionPolicy::parse(&config.detector.selection) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "invalid detector config");
            std::process::exit(1);
        }
    };

    let detector = match YoloDetector::load(&config.detector) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to load detection model");
            std::process::exit(1);
        }
    };

    if config.camera.replay_dir.is_none() {
        source::check_ffmpeg_available().await;
    }
    let source = match source::open_source(&config.camera) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open video source");
            std::process::exit(1);
        }
    };

    let storage = Arc::new(S3Storage::new(&config.storage).await);
    if config.storage.verify_on_startup
        && health::verify_credentials(&storage, config.storage.require_credentials)
            .await
            .is_err()
    {
        std::process::exit(1);
    }

    let sink: Arc<dyn NotificationSink> = if config.notify.enabled {
        let timeout = Duration::from_secs(config.notify.timeout_secs);
        let mint = match MintClient::new(&config.notify.endpoint, timeout) {
            Ok(m) => m,
            Err(e) => {
                error!(error = %e, "failed to build notification client");
                std::process::exit(1);
            }
        };
        Arc::new(CloudNotifier::new(
            storage,
            mint,
            config.storage.prefix.clone(),
            config.storage.archive_dir.as_ref().map(PathBuf::from),
            tokio::runtime::Handle::current(),
        ))
    } else {
        info!("notification delivery disabled; detections are only logged");
        Arc::new(LogNotifier::new(config.storage.prefix.clone()))
    };

    let pipeline = StreamPipeline::new(
        source,
        Box::new(detector),
        sink,
        NotificationGate::new(Duration::from_secs_f64(config.notify.cooldown_secs)),
        Box::new(MonotonicClock),
        PipelineSettings {
            confidence_threshold: config.detector.confidence_threshold,
            jpeg_quality: config.stream.jpeg_quality,
            policy,
        },
    );

    let camera_config = config.camera.clone();
    let opener: http::SourceOpener = Arc::new(move || source::open_source(&camera_config));
    let app = http::router(http::AppState::new(pipeline, opener));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(addr, "fire-watch stream server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
