use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus scrape endpoint (text exposition format).
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the API and worker emit.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "admission_decisions_total",
        "Admission decisions by outcome (cached, admitted, in_flight, reclaimed, forced_restart)"
    );
    metrics::describe_counter!(
        "admission_contended_total",
        "Admissions abandoned after repeatedly losing the job record swap"
    );
    metrics::describe_counter!(
        "transcription_jobs_total",
        "Transcription attempts handed to the queue"
    );
    metrics::describe_counter!(
        "transcription_jobs_completed",
        "Transcription attempts completed"
    );
    metrics::describe_counter!(
        "transcription_jobs_failed",
        "Transcription attempts that failed"
    );
    metrics::describe_counter!(
        "stale_writes_discarded_total",
        "Worker reports dropped because the attempt was superseded"
    );
    metrics::describe_histogram!(
        "transcription_processing_seconds",
        "Time to process one transcription attempt"
    );
    metrics::describe_gauge!(
        "transcription_queue_depth",
        "Current number of attempts waiting in the queue"
    );
}
