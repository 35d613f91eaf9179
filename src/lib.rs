//! Idempotent transcription service.
//!
//! Requests for the same media are fingerprinted and admitted at most once at a
//! time: a finished job is served from cache, a running one is shared, a stale
//! one is reclaimed and `force` starts over. Admitted jobs are handed to a
//! Redis-backed worker that transcribes with AssemblyAI and summarises with OpenAI.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
