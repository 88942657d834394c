use serde::{Deserialize, Serialize};

use crate::domain::classification::{ClassificationResult, Intent};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Greeting,
    Qualification,
    Information,
    Scheduling,
    Objection,
    Fallback,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Qualification => "qualification",
            Self::Information => "information",
            Self::Scheduling => "scheduling",
            Self::Objection => "objection",
            Self::Fallback => "fallback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "greeting" => Some(Self::Greeting),
            "qualification" => Some(Self::Qualification),
            "information" => Some(Self::Information),
            "scheduling" => Some(Self::Scheduling),
            "objection" => Some(Self::Objection),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Router;

impl Router {
    pub fn new() -> Self {
        Self
    }

    pub fn route(&self, intent: Intent) -> StepName {
        match intent {
            Intent::Greeting => StepName::Greeting,
            Intent::InformationRequest => StepName::Information,
            Intent::Qualification => StepName::Qualification,
            Intent::Scheduling => StepName::Scheduling,
            Intent::Objection => StepName::Objection,
            Intent::Fallback => StepName::Fallback,
        }
    }

    /// A recognized routing hint wins over the intent mapping.
    pub fn resolve(&self, classification: &ClassificationResult) -> StepName {
        classification
            .routing_hint
            .as_deref()
            .and_then(StepName::parse)
            .unwrap_or_else(|| self.route(classification.intent))
    }
}
