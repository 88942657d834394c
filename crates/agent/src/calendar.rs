use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use tutorbot_core::domain::calendar::{AvailabilityCheck, Conflict, TimeWindow};
use tutorbot_core::domain::conversation::ConversationState;
use tutorbot_core::resilience::{CircuitState, ResilienceConfig, ResilienceWrapper};

/// Length of the trial lesson slot checked against the calendar.
pub const TRIAL_LESSON_MINUTES: i64 = 60;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar request failed: {0}")]
    Request(String),
    #[error("calendar quota exhausted")]
    Quota,
}

/// Quota-bound availability collaborator. Only ever called through [`GuardedCalendar`].
#[async_trait]
pub trait CalendarClient: Send + Sync {
    async fn check_availability(&self, window: &TimeWindow) -> Result<Vec<Conflict>, CalendarError>;
}

/// Calendar used when no provider is wired: every window is free.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenCalendar;

#[async_trait]
impl CalendarClient for OpenCalendar {
    async fn check_availability(
        &self,
        _window: &TimeWindow,
    ) -> Result<Vec<Conflict>, CalendarError> {
        Ok(Vec::new())
    }
}

pub struct GuardedCalendar {
    client: Arc<dyn CalendarClient>,
    wrapper: ResilienceWrapper<String, Vec<Conflict>>,
}

impl GuardedCalendar {
    pub fn new(client: Arc<dyn CalendarClient>, config: ResilienceConfig) -> Self {
        Self { client, wrapper: ResilienceWrapper::new("calendar", config) }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.wrapper.circuit_state()
    }

    /// With nothing cached, an unavailable calendar reads as "no conflicts".
    pub async fn check(&self, window: TimeWindow) -> AvailabilityCheck {
        let client = Arc::clone(&self.client);
        let lookup = window.clone();
        let answer = self
            .wrapper
            .call_or_default(window.cache_key(), Vec::new(), move || async move {
                client.check_availability(&lookup).await
            })
            .await;

        info!(
            event_name = "agent.calendar.checked",
            window = %window.cache_key(),
            conflicts = answer.value.len(),
            source = answer.source.as_str(),
            "availability resolved"
        );

        AvailabilityCheck { window, conflicts: answer.value, source: answer.source }
    }
}

/// Window for the requested slot, from the message entities or the conversation.
///
/// `preferred_time` must be an RFC 3339 timestamp; anything else means the
/// student still has to name a usable time.
pub fn requested_window(
    state: &ConversationState,
    entities: &Map<String, Value>,
) -> Option<TimeWindow> {
    let raw = state.entity(entities, "preferred_time")?.as_str()?;
    let start = DateTime::parse_from_rfc3339(raw.trim()).ok()?.with_timezone(&Utc);
    Some(TimeWindow::starting_at(start, Duration::minutes(TRIAL_LESSON_MINUTES)))
}
