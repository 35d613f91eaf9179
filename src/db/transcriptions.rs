use sqlx::{PgPool, Row};

use crate::models::job::JobId;
use crate::models::transcription::{NewTranscription, Transcription};
use crate::services::fingerprint::FingerprintKey;

/// Insert a finished transcription and return its id
pub async fn insert_transcription(
    pool: &PgPool,
    new: &NewTranscription,
) -> Result<i64, sqlx::Error> {
    let summary = serde_json::to_value(&new.summary)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    let row = sqlx::query(
        r#"
        INSERT INTO transcriptions
            (job_id, fingerprint, source_url, file_name, user_id, meeting_type, transcript, summary)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(new.job_id.as_uuid())
    .bind(new.fingerprint.to_hex())
    .bind(new.source_url.as_deref())
    .bind(&new.file_name)
    .bind(new.user_id.as_deref())
    .bind(new.meeting_type.as_deref())
    .bind(&new.transcript)
    .bind(summary)
    .fetch_one(pool)
    .await?;

    row.try_get("id")
}

/// Get a transcription by id
pub async fn get_transcription(
    pool: &PgPool,
    id: i64,
) -> Result<Option<Transcription>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, job_id, fingerprint, source_url, file_name, user_id, meeting_type,
               transcript, summary, created_at
        FROM transcriptions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(r) = row else {
        return Ok(None);
    };

    let fingerprint: String = r.try_get("fingerprint")?;
    let summary: serde_json::Value = r.try_get("summary")?;

    Ok(Some(Transcription {
        id: r.try_get("id")?,
        job_id: JobId::from_uuid(r.try_get("job_id")?),
        fingerprint: FingerprintKey::from_hex(fingerprint.trim())
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        source_url: r.try_get("source_url")?,
        file_name: r.try_get("file_name")?,
        user_id: r.try_get("user_id")?,
        meeting_type: r.try_get("meeting_type")?,
        transcript: r.try_get("transcript")?,
        summary: serde_json::from_value(summary).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        created_at: r.try_get("created_at")?,
    }))
}
