use crate::cli::ServeArgs;
use crate::infra::{AppState, Services};
use crate::routes::with_school_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use schoolhub::config::AppConfig;
use schoolhub::error::AppError;
use schoolhub::results::PdfSnapshotRenderer;
use schoolhub::store::Database;
use schoolhub::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(database) = args.database.take() {
        config.storage.database_path = database;
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let db = Arc::new(Database::open(&config.storage.database_path)?);
    db.set_busy_timeout(config.limits.payment_timeout)?;
    std::fs::create_dir_all(&config.storage.snapshot_dir)?;
    let renderer = PdfSnapshotRenderer::new(config.storage.snapshot_dir.clone());
    let services = Services::build(db, renderer, config.limits, &config.payments);

    let app = with_school_routes(&services)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        database = %config.storage.database_path.display(),
        "schoolhub service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
