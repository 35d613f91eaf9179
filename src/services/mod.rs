pub mod admission;
pub mod auth;
pub mod clock;
pub mod dispatch;
pub mod download;
pub mod encryption;
pub mod fingerprint;
pub mod job_store;
pub mod pipeline;
pub mod queue;
pub mod reporting;
pub mod staleness;
pub mod storage;
pub mod summarizer;
pub mod transcriber;
pub mod worker;
