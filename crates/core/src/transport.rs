//! Boundary types shared by the WhatsApp adapter and the delivery agent.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::message::{ConversationId, InboundMessage};

/// Inbound message as handed over by the transport, before it becomes an
/// [`InboundMessage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub instance: String,
    pub phone: String,
    pub message: String,
    pub message_id: String,
    /// Seconds since the Unix epoch as reported by the transport.
    pub timestamp: i64,
    pub from_me: bool,
}

impl InboundEnvelope {
    /// Own messages and empty texts are not processed.
    pub fn is_actionable(&self) -> bool {
        !self.from_me && !self.message.trim().is_empty() && !self.message_id.trim().is_empty()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.timestamp, 0).single().unwrap_or_else(Utc::now)
    }

    pub fn to_inbound(&self) -> InboundMessage {
        InboundMessage::new(
            ConversationId::from_phone(&self.phone).0,
            self.message_id.clone(),
            self.message.clone(),
            self.received_at(),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub instance: String,
    pub phone: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub status: String,
    pub message_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Request(String),
    #[error("transport rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("transport response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::InboundEnvelope;

    fn envelope() -> InboundEnvelope {
        InboundEnvelope {
            instance: "tutorbot".to_owned(),
            phone: "5511999990000@s.whatsapp.net".to_owned(),
            message: "oi".to_owned(),
            message_id: "ABC123".to_owned(),
            timestamp: 1_700_000_000,
            from_me: false,
        }
    }

    #[test]
    fn converts_to_inbound_message_with_derived_conversation() {
        let inbound = envelope().to_inbound();

        assert_eq!(inbound.conversation_id.as_str(), "wa:5511999990000");
        assert_eq!(inbound.message_id.0, "ABC123");
        assert_eq!(inbound.received_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn own_and_empty_messages_are_not_actionable() {
        let mut own = envelope();
        own.from_me = true;
        let mut blank = envelope();
        blank.message = "   ".to_owned();

        assert!(envelope().is_actionable());
        assert!(!own.is_actionable());
        assert!(!blank.is_actionable());
    }
}
