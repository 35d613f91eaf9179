use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use transcribe_gate::{
    app_state::AppState,
    config::AppConfig,
    db::{self, job_records::PgJobStore},
    routes,
    services::{
        admission::AdmissionController, auth::JwtVerifier, clock::SystemClock,
        dispatch::QueueDispatcher, encryption::MediaCipher, queue::JobQueue, storage::R2Client,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    config
        .check_deadlines()
        .expect("Invalid staleness/deadline configuration");

    tracing::info!("Initializing transcribe-gate server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing R2 storage client");
    let r2_client = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize R2 client");

    let cipher =
        MediaCipher::from_base64_key(&config.encryption_key).expect("Failed to initialize encryption");

    tracing::info!("Connecting to Redis job queue");
    let queue = Arc::new(JobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));

    let dispatcher = QueueDispatcher::new(queue.clone(), Arc::new(r2_client), Arc::new(cipher));
    let admission = AdmissionController::new(
        Arc::new(PgJobStore::new(db_pool.clone())),
        Arc::new(dispatcher),
        Arc::new(SystemClock),
        config.stale_after(),
    );
    tracing::info!(
        stale_after_secs = config.stale_after_secs,
        "Admission controller ready"
    );

    let state = AppState::new(db_pool, admission, queue, JwtVerifier::new(&config.jwt_secret));

    let body_limit = usize::try_from(config.max_upload_bytes).unwrap_or(usize::MAX);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/health", get(routes::health::liveness))
        .route("/api/transcribe", post(routes::transcribe::transcribe_from_url))
        .route(
            "/api/transcribe/upload",
            post(routes::transcribe::transcribe_upload),
        )
        .route("/api/jobs/{job_id}", get(routes::jobs::get_job))
        .route(
            "/api/transcriptions/{id}",
            get(routes::jobs::get_transcription),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer(&config.allowed_origins()))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit));

    tracing::info!("Starting transcribe-gate on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
