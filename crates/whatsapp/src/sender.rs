use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use tutorbot_core::transport::{MessageSender, OutboundMessage, SendReceipt, TransportError};

/// `POST {base_url}/message/sendText/{instance}` authenticated by an `apikey` header.
pub struct HttpMessageSender {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

#[derive(Debug, Deserialize)]
struct SendTextResponse {
    #[serde(default)]
    key: Option<SentKey>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentKey {
    #[serde(default)]
    id: Option<String>,
}

impl HttpMessageSender {
    pub fn new(client: Client, base_url: &str, api_key: SecretString) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), api_key }
    }

    fn send_text_url(&self, instance: &str) -> String {
        format!("{}/message/sendText/{}", self.base_url, instance)
    }
}

/// The gateway wants bare digits, not a JID.
pub fn recipient_number(phone: &str) -> String {
    phone.split('@').next().unwrap_or_default().chars().filter(char::is_ascii_digit).collect()
}

#[async_trait]
impl MessageSender for HttpMessageSender {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError> {
        let url = self.send_text_url(&message.instance);
        let response = self
            .client
            .post(&url)
            .header("apikey", self.api_key.expose_secret())
            .json(&json!({
                "number": recipient_number(&message.phone),
                "text": message.text,
            }))
            .send()
            .await
            .map_err(|send_error| {
                error!(
                    event_name = "whatsapp.sender.request_failed",
                    instance = %message.instance,
                    error = %send_error,
                    "sendText request failed"
                );
                TransportError::Request(send_error.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                event_name = "whatsapp.sender.rejected",
                instance = %message.instance,
                status = status.as_u16(),
                "sendText rejected by gateway"
            );
            return Err(TransportError::Rejected { status: status.as_u16(), body });
        }

        let sent: SendTextResponse = response
            .json()
            .await
            .map_err(|decode_error| TransportError::Decode(decode_error.to_string()))?;
        let receipt = SendReceipt {
            status: sent.status.unwrap_or_else(|| "SENT".to_string()),
            message_id: sent.key.and_then(|key| key.id),
        };
        info!(
            event_name = "whatsapp.sender.sent",
            instance = %message.instance,
            status = %receipt.status,
            text_len = message.text.chars().count(),
            "message handed to gateway"
        );
        Ok(receipt)
    }
}

/// Used when no gateway is configured: logs and reports success without sending.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMessageSender;

#[async_trait]
impl MessageSender for NoopMessageSender {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError> {
        info!(
            event_name = "whatsapp.sender.noop",
            instance = %message.instance,
            text_len = message.text.chars().count(),
            "no gateway configured, dropping outbound message"
        );
        Ok(SendReceipt { status: "SKIPPED".to_string(), message_id: None })
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Client;
    use secrecy::SecretString;

    use tutorbot_core::transport::{MessageSender, OutboundMessage};

    use super::{recipient_number, HttpMessageSender, NoopMessageSender};

    #[test]
    fn recipient_number_strips_jid_and_punctuation() {
        assert_eq!(recipient_number("5511999990000@s.whatsapp.net"), "5511999990000");
        assert_eq!(recipient_number("+55 (11) 99999-0000"), "5511999990000");
    }

    #[test]
    fn send_text_url_joins_base_and_instance() {
        let sender = HttpMessageSender::new(
            Client::new(),
            "https://gateway.example.com/",
            SecretString::from("key".to_string()),
        );

        assert_eq!(
            sender.send_text_url("tutorbot"),
            "https://gateway.example.com/message/sendText/tutorbot"
        );
    }

    #[tokio::test]
    async fn noop_sender_reports_skipped() {
        let receipt = NoopMessageSender
            .send(&OutboundMessage {
                instance: "tutorbot".to_string(),
                phone: "5511".to_string(),
                text: "Olá".to_string(),
            })
            .await
            .expect("noop never fails");

        assert_eq!(receipt.status, "SKIPPED");
        assert_eq!(receipt.message_id, None);
    }
}
