use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8080"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job queue
    pub redis_url: String,

    /// R2 bucket name for staged uploads
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// AES-256-GCM key for staged uploads (base64-encoded, 32 bytes)
    pub encryption_key: String,

    /// HS256 secret used to verify caller access tokens
    pub jwt_secret: String,

    pub assemblyai_api_key: String,

    #[serde(default = "default_language_code")]
    pub assemblyai_language_code: String,

    pub openai_api_key: String,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    /// Seconds without an update after which an in-flight attempt may be reclaimed
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u32,

    /// Upper bound on one worker attempt; must stay below `stale_after_secs`
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u32,

    /// Address of the worker's Prometheus scrape listener
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    /// Comma-separated allowed origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: String,

    /// Upper bound for uploaded and downloaded media
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_language_code() -> String {
    "pt".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_stale_after_secs() -> u32 {
    2 * 60 * 60
}

fn default_job_timeout_secs() -> u32 {
    110 * 60
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_max_upload_bytes() -> u64 {
    500 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.stale_after_secs))
    }

    pub fn job_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.job_timeout_secs))
    }

    /// A healthy attempt must finish before it can be judged stale, or slow jobs run twice.
    pub fn check_deadlines(&self) -> Result<(), ConfigError> {
        if self.job_timeout_secs >= self.stale_after_secs {
            return Err(ConfigError::DeadlineExceedsStaleness {
                job_timeout_secs: self.job_timeout_secs,
                stale_after_secs: self.stale_after_secs,
            });
        }
        Ok(())
    }

    pub fn worker_metrics_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.worker_metrics_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddr(self.worker_metrics_addr.clone()))
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JOB_TIMEOUT_SECS ({job_timeout_secs}) must be below STALE_AFTER_SECS ({stale_after_secs})")]
    DeadlineExceedsStaleness {
        job_timeout_secs: u32,
        stale_after_secs: u32,
    },

    #[error("invalid socket address `{0}`")]
    InvalidAddr(String),
}
