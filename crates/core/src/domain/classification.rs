use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::flows::router::StepName;

/// Closed set of intents the classifier may report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    InformationRequest,
    Qualification,
    Scheduling,
    Fallback,
    Objection,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Self::Greeting,
        Self::InformationRequest,
        Self::Qualification,
        Self::Scheduling,
        Self::Fallback,
        Self::Objection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::InformationRequest => "information_request",
            Self::Qualification => "qualification",
            Self::Scheduling => "scheduling",
            Self::Fallback => "fallback",
            Self::Objection => "objection",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "greeting" => Some(Self::Greeting),
            "information_request" => Some(Self::InformationRequest),
            "qualification" => Some(Self::Qualification),
            "scheduling" => Some(Self::Scheduling),
            "fallback" => Some(Self::Fallback),
            "objection" => Some(Self::Objection),
            _ => None,
        }
    }

    /// Unknown or invalid values collapse to `Fallback`.
    pub fn normalize(value: &str) -> Self {
        Self::parse(value).unwrap_or(Self::Fallback)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: Intent,
    pub confidence: f64,
    pub entities: Map<String, Value>,
    pub routing_hint: Option<String>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ClassificationResult {
    /// Synthetic result used whenever the upstream call cannot produce one.
    pub fn fallback(cause: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            intent: Intent::Fallback,
            confidence: 0.0,
            entities: Map::new(),
            routing_hint: None,
            latency_ms,
            error: Some(cause.into()),
        }
    }

    /// Builds a result from an arbitrary upstream payload.
    ///
    /// Holds for every input shape, including `null`, arrays and scalars:
    /// - `confidence` is clamped to `[0, 1]`; missing, non-numeric or NaN becomes `0.0`
    /// - `intent` outside the closed set becomes `fallback`
    /// - `entities` that is absent or not an object becomes an empty map
    /// - `routing_hint` survives only if it names a known step
    pub fn from_payload(payload: &Value, latency_ms: u64) -> Self {
        let intent = payload
            .get("intent")
            .and_then(Value::as_str)
            .map(Intent::normalize)
            .unwrap_or(Intent::Fallback);

        let entities = match payload.get("entities") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        let routing_hint = payload
            .get("routing_hint")
            .and_then(Value::as_str)
            .and_then(StepName::parse)
            .map(|step| step.as_str().to_string());

        Self {
            intent,
            confidence: normalize_confidence(payload.get("confidence")),
            entities,
            routing_hint,
            latency_ms,
            error: None,
        }
    }
}

fn normalize_confidence(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };

    match raw {
        Some(confidence) if confidence.is_finite() => confidence.clamp(0.0, 1.0),
        _ => 0.0,
    }
}
