use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;
use tracing::info;

use tutorbot_agent::{
    ClassifierClient, DeliveryAgent, GuardedCalendar, HttpIntentModel, IdempotentProcessor,
    IntentModel, MessagePipeline, OfflineIntentModel, OpenCalendar,
};
use tutorbot_core::config::{AppConfig, ConfigError};
use tutorbot_core::transport::MessageSender;
use tutorbot_db::{
    connect_with_config, migrations, DbPool, DisabledStateCache, InMemoryStateCache,
    SqlConversationRepository, SqlIdempotencyLedger, StateCache, TieredStateStore,
};
use tutorbot_whatsapp::{HttpMessageSender, NoopMessageSender};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub pipeline: Arc<MessagePipeline>,
    pub calendar: Arc<GuardedCalendar>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let client = Client::builder().build().map_err(BootstrapError::HttpClient)?;
    let calendar =
        Arc::new(GuardedCalendar::new(Arc::new(OpenCalendar), config.calendar.resilience()));
    let pipeline =
        Arc::new(build_pipeline(&config, db_pool.clone(), client, Arc::clone(&calendar)));

    Ok(Application { config, db_pool, pipeline, calendar })
}

fn build_pipeline(
    config: &AppConfig,
    db_pool: DbPool,
    client: Client,
    calendar: Arc<GuardedCalendar>,
) -> MessagePipeline {
    let cache: Arc<dyn StateCache> = if config.cache.enabled {
        Arc::new(InMemoryStateCache::from_config(&config.cache))
    } else {
        Arc::new(DisabledStateCache)
    };
    let store = Arc::new(TieredStateStore::new(
        Arc::new(SqlConversationRepository::new(db_pool.clone())),
        cache,
    ));
    let ledger = Arc::new(SqlIdempotencyLedger::new(db_pool));

    let model: Arc<dyn IntentModel> = match &config.classifier.base_url {
        Some(base_url) => Arc::new(HttpIntentModel::new(
            client.clone(),
            base_url,
            config.classifier.api_key.clone(),
        )),
        None => Arc::new(OfflineIntentModel),
    };
    let classifier = ClassifierClient::from_config(model, &config.classifier);
    let processor = Arc::new(IdempotentProcessor::new(ledger, store, classifier, calendar));

    let sender: Arc<dyn MessageSender> =
        match (&config.whatsapp.base_url, &config.whatsapp.api_key) {
            (Some(base_url), Some(api_key)) => {
                Arc::new(HttpMessageSender::new(client, base_url, api_key.clone()))
            }
            _ => Arc::new(NoopMessageSender),
        };
    let delivery = Arc::new(DeliveryAgent::from_config(sender, &config.delivery));

    info!(
        event_name = "system.bootstrap.pipeline_ready",
        correlation_id = "bootstrap",
        classifier_mode = if config.classifier.base_url.is_some() { "http" } else { "offline" },
        sender_mode = if config.whatsapp.base_url.is_some() { "http" } else { "noop" },
        cache_enabled = config.cache.enabled,
        "message pipeline assembled"
    );

    MessagePipeline::new(processor, delivery)
}

#[cfg(test)]
mod tests {
    use tutorbot_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?).await
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_when_gateway_key_is_missing() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                whatsapp_base_url: Some("https://gateway.example.com".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("bootstrap must fail").to_string();
        assert!(message.contains("whatsapp.api_key"), "{message}");
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with defaults");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('conversation_state', 'processed_message')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables should exist after bootstrap");
        assert_eq!(table_count, 2);

        app.db_pool.close().await;
    }
}
