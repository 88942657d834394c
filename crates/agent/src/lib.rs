//! Message handling for the tutoring assistant.
//!
//! Each inbound WhatsApp message goes through one fixed path:
//! 1. **Classification** (`classifier`): remote intent model behind a timeout
//!    and bounded retry, degrading to a fallback classification
//! 2. **Routing and step execution**: pure functions from `tutorbot-core`
//! 3. **Idempotent processing** (`processor`): ledger check, state update and
//!    an atomic processed-record insert
//! 4. **Delivery** (`delivery`): send with retries, skipped for replays
//!
//! Calendar lookups for the scheduling step go through `calendar`, which wraps
//! the collaborator in the shared circuit breaker / rate limiter / cache.

pub mod calendar;
pub mod classifier;
pub mod delivery;
pub mod pipeline;
pub mod processor;

pub use calendar::{CalendarClient, CalendarError, GuardedCalendar, OpenCalendar};
pub use classifier::{
    ClassifierClient, ClassifierError, HttpIntentModel, IntentModel, OfflineIntentModel,
    TurnContext,
};
pub use delivery::DeliveryAgent;
pub use pipeline::{MessagePipeline, PipelineOutcome};
pub use processor::{IdempotentProcessor, ProcessError};
