use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use tutorbot_core::domain::conversation::Stage;
use tutorbot_core::domain::message::{ConversationId, IdempotencyKey};
use tutorbot_core::domain::processing::ProcessedRecord;

use super::{format_timestamp, parse_timestamp, IdempotencyLedger, RepositoryError};
use crate::DbPool;

/// Ledger backed by the `processed_message` table. Atomicity of
/// `mark_processed` comes from the primary key, not from any in-process lock,
/// so it holds across processes sharing the database.
pub struct SqlIdempotencyLedger {
    pool: DbPool,
}

impl SqlIdempotencyLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IdempotencyLedger for SqlIdempotencyLedger {
    async fn has_processed(&self, key: &IdempotencyKey) -> Result<bool, RepositoryError> {
        let row =
            sqlx::query("SELECT 1 AS present FROM processed_message WHERE idempotency_key = ?")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn mark_processed(&self, record: &ProcessedRecord) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO processed_message (
                idempotency_key,
                conversation_id,
                response_text,
                stage_before,
                stage_after,
                processed_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(idempotency_key) DO NOTHING",
        )
        .bind(record.idempotency_key.as_str())
        .bind(record.conversation_id.as_str())
        .bind(&record.response_text)
        .bind(record.stage_before.as_str())
        .bind(record.stage_after.as_str())
        .bind(format_timestamp(record.processed_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_record(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<ProcessedRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                idempotency_key,
                conversation_id,
                response_text,
                stage_before,
                stage_after,
                processed_at
             FROM processed_message
             WHERE idempotency_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM processed_message WHERE processed_at < ?")
            .bind(format_timestamp(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn record_from_row(row: SqliteRow) -> Result<ProcessedRecord, RepositoryError> {
    Ok(ProcessedRecord {
        idempotency_key: IdempotencyKey(row.try_get("idempotency_key")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        response_text: row.try_get("response_text")?,
        stage_before: parse_stage("stage_before", row.try_get("stage_before")?)?,
        stage_after: parse_stage("stage_after", row.try_get("stage_after")?)?,
        processed_at: parse_timestamp("processed_at", row.try_get("processed_at")?)?,
    })
}

fn parse_stage(column: &str, value: String) -> Result<Stage, RepositoryError> {
    value
        .parse::<Stage>()
        .map_err(|error| RepositoryError::Decode(format!("invalid `{column}`: {error}")))
}
