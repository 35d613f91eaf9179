use chrono::{DateTime, Duration, Utc};

use crate::models::job::JobRecord;

/// True when an in-flight attempt has not been updated for longer than `threshold`.
///
/// Terminal records are never stale. The comparison is strict, so a record
/// exactly `threshold` old is still owned by its attempt.
pub fn is_stale(record: &JobRecord, now: DateTime<Utc>, threshold: Duration) -> bool {
    record.status.is_in_flight() && now - record.updated_at > threshold
}
