use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Derives the stable per-user conversation id from a WhatsApp phone or JID.
    ///
    /// `"+55 (11) 98888-7777"`, `"5511988887777"` and
    /// `"5511988887777@s.whatsapp.net"` all map to `wa:5511988887777`.
    pub fn from_phone(phone: &str) -> Self {
        let local_part = phone.split('@').next().unwrap_or_default();
        let digits = local_part.chars().filter(char::is_ascii_digit).collect::<String>();
        Self(format!("wa:{digits}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn new(conversation_id: &ConversationId, message_id: &MessageId) -> Self {
        Self(format!("{}:{}", conversation_id.0, message_id.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message as received from the transport. Never mutated after construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: MessageId(message_id.into()),
            conversation_id: ConversationId(conversation_id.into()),
            text: text.into(),
            received_at,
        }
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.conversation_id, &self.message_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ConversationId, IdempotencyKey, InboundMessage, MessageId};

    #[test]
    fn conversation_id_is_stable_across_phone_spellings() {
        let expected = ConversationId("wa:5511988887777".to_string());

        assert_eq!(ConversationId::from_phone("+55 (11) 98888-7777"), expected);
        assert_eq!(ConversationId::from_phone("5511988887777"), expected);
        assert_eq!(ConversationId::from_phone("5511988887777@s.whatsapp.net"), expected);
    }

    #[test]
    fn idempotency_key_joins_conversation_and_message_ids() {
        let message = InboundMessage::new("555-1", "m1", "oi", Utc::now());

        assert_eq!(message.idempotency_key(), IdempotencyKey("555-1:m1".to_string()));
        assert_eq!(
            IdempotencyKey::new(&ConversationId("c".to_string()), &MessageId("id".to_string()))
                .as_str(),
            "c:id"
        );
    }
}
