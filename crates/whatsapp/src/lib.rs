//! WhatsApp transport adapter.
//!
//! - **Webhook** (`webhook`): flattens the gateway's `messages.upsert` payload
//!   into an [`InboundEnvelope`](tutorbot_core::transport::InboundEnvelope)
//! - **Sender** (`sender`): `sendText` over HTTP, or a no-op sender when no
//!   gateway is configured

pub mod sender;
pub mod webhook;

pub use sender::{HttpMessageSender, NoopMessageSender};
pub use webhook::{parse_webhook, WebhookError, WebhookEvent};
