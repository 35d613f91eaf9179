use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use transcribe_gate::{
    config::AppConfig,
    db::{self, job_records::PgJobStore},
    routes,
    services::{
        download::MediaDownloader, encryption::MediaCipher, pipeline::TranscriptionPipeline,
        queue::JobQueue, storage::R2Client, summarizer::OpenAiSummarizer,
        transcriber::AssemblyAiClient, worker::Worker,
    },
};

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting transcription worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    config
        .check_deadlines()
        .expect("Invalid worker deadline configuration");

    // The worker serves its own scrape endpoint; the API's /metrics lives in another process.
    let metrics_addr = config
        .worker_metrics_addr()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus metrics exporter");
    routes::metrics::describe_metrics();
    tracing::info!(%metrics_addr, "Worker metrics listener started");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let storage = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize R2 client");

    let pipeline = TranscriptionPipeline::new(
        db_pool.clone(),
        storage,
        MediaCipher::from_base64_key(&config.encryption_key)
            .expect("Failed to initialize encryption"),
        MediaDownloader::new(config.max_upload_bytes)
            .expect("Failed to initialize media downloader"),
        AssemblyAiClient::new(
            config.assemblyai_api_key.as_str(),
            config.assemblyai_language_code.as_str(),
        ),
        OpenAiSummarizer::new(config.openai_api_key.as_str(), config.openai_model.as_str()),
    );

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let worker = Worker::new(
        Arc::new(PgJobStore::new(db_pool)),
        Arc::new(queue),
        Arc::new(pipeline),
        config.job_timeout(),
    );

    tracing::info!(
        job_timeout_secs = config.job_timeout_secs,
        "Worker ready, starting job processing loop"
    );

    loop {
        match worker.process_next_job().await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}
