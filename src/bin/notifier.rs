use metrics_exporter_prometheus::PrometheusBuilder;
use scan_pipeline::{
    config::AppConfig,
    db,
    pipeline::{self, ScanDispatcher},
    services::{
        encryption::ImageCipher, recognition::VisualRecognitionClient, staging::ImageStager,
    },
    store::PgRecordStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting scan notifier");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Metrics are scraped straight from the notifier process
    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .expect("METRICS_ADDR must be a socket address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    pipeline::describe_metrics();

    // Initialize database
    tracing::info!("Connecting to PostgreSQL record store");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize services
    tracing::info!("Initializing services");
    let api_key = config
        .require_recognition_api_key()
        .expect("RECOGNITION_API_KEY is required by the notifier");
    let recognizer = VisualRecognitionClient::new(
        &config.recognition_url,
        api_key,
        &config.recognition_version,
    )
    .expect("Failed to initialize recognition client");

    let mut stager = ImageStager::new(&config.staging_dir, config.upload_limits());
    if let Some(key) = &config.staging_encryption_key {
        let cipher = ImageCipher::from_base64_key(key).expect("Invalid staging encryption key");
        stager = stager.with_cipher(cipher);
    }

    let scope = config.store_scope().expect("Invalid NOTIFIER_PATH");

    let dispatcher = ScanDispatcher::new(
        Arc::new(PgRecordStore::new(db_pool)),
        Arc::new(recognizer),
        stager,
        scope,
    )
    .with_recognition_timeout(config.recognition_timeout());

    tracing::info!(
        scope = %dispatcher.scope(),
        staging_dir = %config.staging_dir,
        "Notifier ready"
    );

    tokio::select! {
        result = dispatcher.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Notifier stopped");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }
}
