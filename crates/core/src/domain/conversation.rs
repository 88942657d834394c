use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::message::ConversationId;
use crate::errors::DomainError;

/// Node of the dialogue state machine for one end user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Greeting,
    Qualification,
    Information,
    Scheduling,
    Confirmation,
    FollowUp,
    Completed,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Self::Greeting,
        Self::Qualification,
        Self::Information,
        Self::Scheduling,
        Self::Confirmation,
        Self::FollowUp,
        Self::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Qualification => "qualification",
            Self::Information => "information",
            Self::Scheduling => "scheduling",
            Self::Confirmation => "confirmation",
            Self::FollowUp => "follow_up",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "greeting" => Some(Self::Greeting),
            "qualification" => Some(Self::Qualification),
            "information" => Some(Self::Information),
            "scheduling" => Some(Self::Scheduling),
            "confirmation" => Some(Self::Confirmation),
            "follow_up" => Some(Self::FollowUp),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| DomainError::UnknownStage(value.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: ConversationId,
    pub stage: Stage,
    pub context: Map<String, Value>,
    pub entities: Map<String, Value>,
    pub message_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(conversation_id: ConversationId, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            stage: Stage::Greeting,
            context: Map::new(),
            entities: Map::new(),
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Looks a field up in the fresh message entities first, then in what the
    /// conversation has accumulated so far. Null and blank strings count as absent.
    pub fn entity<'a>(&'a self, fresh: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
        fresh.get(key).filter(|value| is_present(value)).or_else(|| {
            self.entities.get(key).filter(|value| is_present(value))
        })
    }

    pub fn with_stage(mut self, stage: Stage, now: DateTime<Utc>) -> Self {
        self.stage = stage;
        self.updated_at = now;
        self
    }

    pub fn with_turn_applied(mut self, update: &TurnUpdate, now: DateTime<Utc>) -> Self {
        merge_into(&mut self.context, &update.context_patch);
        merge_into(&mut self.entities, &update.entities_patch);
        self.message_count = self.message_count.saturating_add(1);
        self.updated_at = now;
        self
    }
}

/// Per-message mutation of a conversation, applied atomically by the state store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnUpdate {
    pub context_patch: Map<String, Value>,
    pub entities_patch: Map<String, Value>,
}

/// Later keys overwrite equal keys; keys absent from `patch` are left alone.
pub fn merge_into(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        _ => true,
    }
}
