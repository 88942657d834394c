use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, Row};

use tutorbot_core::domain::conversation::{ConversationState, Stage};
use tutorbot_core::domain::message::ConversationId;

use super::{format_timestamp, parse_timestamp, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                conversation_id,
                stage,
                context_json,
                entities_json,
                message_count,
                created_at,
                updated_at
             FROM conversation_state
             WHERE conversation_id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(state_from_row).transpose()
    }

    async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError> {
        let context_json = encode_map("context_json", &state.context)?;
        let entities_json = encode_map("entities_json", &state.entities)?;

        sqlx::query(
            "INSERT INTO conversation_state (
                conversation_id,
                stage,
                context_json,
                entities_json,
                message_count,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(conversation_id) DO UPDATE SET
                stage = excluded.stage,
                context_json = excluded.context_json,
                entities_json = excluded.entities_json,
                message_count = excluded.message_count,
                updated_at = excluded.updated_at",
        )
        .bind(state.conversation_id.as_str())
        .bind(state.stage.as_str())
        .bind(context_json)
        .bind(entities_json)
        .bind(i64::from(state.message_count))
        .bind(format_timestamp(state.created_at))
        .bind(format_timestamp(state.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn state_from_row(row: SqliteRow) -> Result<ConversationState, RepositoryError> {
    let stage_raw = row.try_get::<String, _>("stage")?;
    let stage = stage_raw
        .parse::<Stage>()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;
    let message_count = row.try_get::<i64, _>("message_count")?;

    Ok(ConversationState {
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        stage,
        context: decode_map("context_json", row.try_get("context_json")?)?,
        entities: decode_map("entities_json", row.try_get("entities_json")?)?,
        message_count: u32::try_from(message_count).map_err(|_| {
            RepositoryError::Decode(format!(
                "invalid value for `message_count` (expected non-negative u32): {message_count}"
            ))
        })?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn encode_map(column: &str, map: &Map<String, Value>) -> Result<String, RepositoryError> {
    serde_json::to_string(map)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}

fn decode_map(column: &str, raw: String) -> Result<Map<String, Value>, RepositoryError> {
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RepositoryError::Decode(format!(
            "`{column}` must hold a JSON object, found `{other}`"
        ))),
        Err(error) => {
            Err(RepositoryError::Decode(format!("invalid JSON in `{column}`: {error}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use tutorbot_core::domain::conversation::{ConversationState, Stage};
    use tutorbot_core::domain::message::ConversationId;

    use super::SqlConversationRepository;
    use crate::repositories::{ConversationRepository, RepositoryError};
    use crate::{connect_with_settings, migrations, DbPool};

    #[tokio::test]
    async fn sql_conversation_repo_round_trip_and_upsert() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let id = ConversationId("wa:5511999990000".to_string());

        assert_eq!(repo.find(&id).await.expect("find missing"), None);

        let mut state = ConversationState::new(id.clone(), parse_ts("2026-03-02T10:00:00Z"));
        state.context.insert("last_step".to_string(), json!("greeting"));
        state.entities.insert("student_name".to_string(), json!("Ana"));
        state.message_count = 1;
        repo.save(&state).await.expect("insert state");
        assert_eq!(repo.find(&id).await.expect("find inserted"), Some(state.clone()));

        let updated =
            state.clone().with_stage(Stage::Qualification, parse_ts("2026-03-02T10:01:00Z"));
        repo.save(&updated).await.expect("upsert state");

        let found = repo.find(&id).await.expect("find updated").expect("state exists");
        assert_eq!(found.stage, Stage::Qualification);
        assert_eq!(found.created_at, state.created_at);
        assert_eq!(found.updated_at, parse_ts("2026-03-02T10:01:00Z"));

        pool.close().await;
    }

    #[tokio::test]
    async fn corrupt_context_column_is_a_decode_error() {
        let pool = setup_pool().await;
        sqlx::query(
            "INSERT INTO conversation_state (
                conversation_id, stage, context_json, entities_json,
                message_count, created_at, updated_at
             ) VALUES (
                'wa:1', 'greeting', '[1,2]', '{}',
                0, '2026-03-02T10:00:00Z', '2026-03-02T10:00:00Z'
             )",
        )
        .execute(&pool)
        .await
        .expect("insert corrupt row");

        let repo = SqlConversationRepository::new(pool.clone());
        let error =
            repo.find(&ConversationId("wa:1".to_string())).await.expect_err("decode fails");

        assert!(matches!(
            error,
            RepositoryError::Decode(ref message) if message.contains("context_json")
        ));
        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
