use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{admission::AdmissionController, auth::JwtVerifier, queue::JobQueue};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub admission: Arc<AdmissionController>,
    pub queue: Arc<JobQueue>,
    pub auth: Arc<JwtVerifier>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        admission: AdmissionController,
        queue: Arc<JobQueue>,
        auth: JwtVerifier,
    ) -> Self {
        Self {
            db,
            admission: Arc::new(admission),
            queue,
            auth: Arc::new(auth),
        }
    }
}
