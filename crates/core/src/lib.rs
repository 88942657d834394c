pub mod backoff;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod resilience;
pub mod transport;

pub use backoff::Backoff;
pub use domain::calendar::{AvailabilityCheck, Conflict, TimeWindow};
pub use domain::classification::{ClassificationResult, Intent};
pub use domain::conversation::{ConversationState, Stage, TurnUpdate};
pub use domain::message::{ConversationId, IdempotencyKey, InboundMessage, MessageId};
pub use domain::processing::{DeliveryAttempt, DeliveryReport, ProcessedRecord, ProcessingResult};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowEngine, Router, StepName, StepOutcome, TutoringFlow};
pub use resilience::{ResilienceConfig, ResilienceError, ResilienceWrapper, Resilient, ResultSource};
pub use transport::{InboundEnvelope, MessageSender, OutboundMessage, SendReceipt, TransportError};
