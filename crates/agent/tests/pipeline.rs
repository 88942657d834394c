use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use tutorbot_agent::calendar::{CalendarClient, CalendarError, GuardedCalendar, OpenCalendar};
use tutorbot_agent::classifier::{ClassifierClient, ClassifierError, IntentModel};
use tutorbot_agent::delivery::DeliveryAgent;
use tutorbot_agent::pipeline::{MessagePipeline, PipelineOutcome};
use tutorbot_agent::processor::{IdempotentProcessor, ProcessError};
use tutorbot_core::backoff::Backoff;
use tutorbot_core::domain::calendar::{Conflict, TimeWindow};
use tutorbot_core::domain::classification::Intent;
use tutorbot_core::domain::conversation::{ConversationState, Stage};
use tutorbot_core::domain::message::{ConversationId, IdempotencyKey, InboundMessage};
use tutorbot_core::resilience::ResilienceConfig;
use tutorbot_core::transport::{
    InboundEnvelope, MessageSender, OutboundMessage, SendReceipt, TransportError,
};
use tutorbot_db::cache::InMemoryStateCache;
use tutorbot_db::repositories::{
    ConversationRepository, IdempotencyLedger, InMemoryConversationRepository,
    InMemoryIdempotencyLedger, RepositoryError,
};
use tutorbot_db::state_store::{StateStore, TieredStateStore};

struct FixedModel {
    payload: Value,
    delay: Duration,
    calls: AtomicU32,
}

impl FixedModel {
    fn new(payload: Value) -> Self {
        Self { payload, delay: Duration::ZERO, calls: AtomicU32::new(0) }
    }
}

#[async_trait]
impl IntentModel for FixedModel {
    async fn classify(&self, _prompt: &str) -> Result<Value, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.payload.clone())
    }
}

struct HangingModel;

#[async_trait]
impl IntentModel for HangingModel {
    async fn classify(&self, _prompt: &str) -> Result<Value, ClassifierError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!({"intent": "greeting", "confidence": 1.0}))
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: tokio::sync::Mutex<Vec<OutboundMessage>>,
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError> {
        self.sent.lock().await.push(message.clone());
        Ok(SendReceipt { status: "PENDING".to_string(), message_id: Some("out-1".to_string()) })
    }
}

struct UnwritableRepository;

#[async_trait]
impl ConversationRepository for UnwritableRepository {
    async fn find(
        &self,
        _id: &ConversationId,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        Ok(None)
    }

    async fn save(&self, _state: &ConversationState) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("disk full".to_string()))
    }
}

struct BusyCalendar;

#[async_trait]
impl CalendarClient for BusyCalendar {
    async fn check_availability(
        &self,
        window: &TimeWindow,
    ) -> Result<Vec<Conflict>, CalendarError> {
        Ok(vec![Conflict {
            start: window.start,
            end: window.end,
            summary: Some("aula em grupo".to_string()),
        }])
    }
}

struct Harness {
    ledger: Arc<InMemoryIdempotencyLedger>,
    store: Arc<TieredStateStore>,
    processor: Arc<IdempotentProcessor>,
}

fn harness_with(
    model: Arc<dyn IntentModel>,
    durable: Arc<dyn ConversationRepository>,
    calendar: Arc<dyn CalendarClient>,
) -> Harness {
    let ledger = Arc::new(InMemoryIdempotencyLedger::default());
    let cache = Arc::new(InMemoryStateCache::new(Duration::from_secs(60), 128));
    let store = Arc::new(TieredStateStore::new(durable, cache));
    let classifier = ClassifierClient::new(
        model,
        Duration::from_millis(50),
        1,
        Backoff::from_millis(1),
    );
    let calendar = Arc::new(GuardedCalendar::new(calendar, ResilienceConfig::default()));
    let processor = Arc::new(IdempotentProcessor::new(
        ledger.clone(),
        store.clone(),
        classifier,
        calendar,
    ));
    Harness { ledger, store, processor }
}

fn harness(model: Arc<dyn IntentModel>) -> Harness {
    harness_with(model, Arc::new(InMemoryConversationRepository::default()), Arc::new(OpenCalendar))
}

fn greeting_model() -> Arc<FixedModel> {
    Arc::new(FixedModel::new(json!({"intent": "greeting", "confidence": 0.95, "entities": {}})))
}

fn envelope(message_id: &str) -> InboundEnvelope {
    InboundEnvelope {
        instance: "tutorbot".to_string(),
        phone: "5511999990000@s.whatsapp.net".to_string(),
        message: "oi".to_string(),
        message_id: message_id.to_string(),
        timestamp: 1_700_000_000,
        from_me: false,
    }
}

#[tokio::test]
async fn greeting_moves_to_qualification_and_redelivery_is_cached() {
    let model = greeting_model();
    let h = harness(model.clone());
    let message = InboundMessage::new("555-1", "m1", "oi", Utc::now());

    let first = h.processor.process(&message).await.expect("first processing");
    assert!(!first.cached);
    assert_eq!(first.stage, Stage::Qualification);
    assert_eq!(first.idempotency_key, IdempotencyKey("555-1:m1".to_string()));
    assert!(!first.response_text.trim().is_empty());

    let second = h.processor.process(&message).await.expect("redelivery");
    assert!(second.cached);
    assert_eq!(second.response_text, first.response_text);
    assert_eq!(second.stage, Stage::Qualification);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1, "duplicates skip classification");

    let state = h
        .store
        .get(&ConversationId("555-1".to_string()))
        .await
        .expect("read state")
        .expect("state exists");
    assert_eq!(state.stage, Stage::Qualification);
    assert_eq!(state.message_count, 1);
    assert_eq!(state.context.get("last_step"), Some(&json!("greeting")));
    assert_eq!(h.ledger.len().await, 1);
}

#[tokio::test]
async fn redelivered_webhook_is_sent_exactly_once() {
    let h = harness(greeting_model());
    let sender = Arc::new(RecordingSender::default());
    let delivery = Arc::new(DeliveryAgent::new(sender.clone(), 2, Backoff::from_millis(1)));
    let pipeline = MessagePipeline::new(h.processor.clone(), delivery);

    let first = pipeline.handle(&envelope("m1")).await.expect("first delivery");
    let second = pipeline.handle(&envelope("m1")).await.expect("redelivery");

    match (first, second) {
        (
            PipelineOutcome::Handled { result: first, delivery: sent },
            PipelineOutcome::Handled { result: replay, delivery: skipped },
        ) => {
            assert!(sent.delivered);
            assert_eq!(sent.attempts, 1);
            assert!(replay.cached);
            assert!(skipped.skipped);
            assert_eq!(skipped.attempts, 0);
            assert_eq!(replay.response_text, first.response_text);
        }
        other => panic!("unexpected outcomes: {other:?}"),
    }

    let sent = sender.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].phone, "5511999990000@s.whatsapp.net");
    assert_eq!(sent[0].instance, "tutorbot");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_produce_one_fresh_result_and_one_send() {
    let model = Arc::new(FixedModel {
        delay: Duration::from_millis(10),
        ..FixedModel::new(json!({"intent": "greeting", "confidence": 0.95}))
    });
    let h = harness(model);
    let sender = Arc::new(RecordingSender::default());
    let delivery = Arc::new(DeliveryAgent::new(sender.clone(), 2, Backoff::from_millis(1)));
    let pipeline = Arc::new(MessagePipeline::new(h.processor.clone(), delivery));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pipeline = pipeline.clone();
        tasks.push(tokio::spawn(async move { pipeline.handle(&envelope("m7")).await }));
    }

    let mut fresh = 0;
    let mut texts = Vec::new();
    for task in tasks {
        match task.await.expect("task joined").expect("pipeline succeeded") {
            PipelineOutcome::Handled { result, .. } => {
                if !result.cached {
                    fresh += 1;
                }
                texts.push(result.response_text);
            }
            PipelineOutcome::Ignored => panic!("actionable envelope was ignored"),
        }
    }

    assert_eq!(fresh, 1);
    assert!(texts.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(sender.sent.lock().await.len(), 1);
    assert_eq!(h.ledger.len().await, 1);
}

#[tokio::test]
async fn classifier_that_always_times_out_still_yields_a_reply() {
    let h = harness(Arc::new(HangingModel));
    let message = InboundMessage::new("wa:5511", "m1", "oi", Utc::now());

    let result = h.processor.process(&message).await.expect("processing never fails on classifier");

    assert!(!result.cached);
    assert!(!result.response_text.trim().is_empty());
    assert_eq!(result.stage, Stage::Greeting, "fallback step never advances");

    let state = h
        .store
        .get(&ConversationId("wa:5511".to_string()))
        .await
        .expect("read state")
        .expect("state exists");
    assert_eq!(state.context.get("last_intent"), Some(&json!(Intent::Fallback.as_str())));
}

#[tokio::test]
async fn durable_failure_aborts_without_writing_the_ledger() {
    let h = harness_with(greeting_model(), Arc::new(UnwritableRepository), Arc::new(OpenCalendar));
    let message = InboundMessage::new("wa:5511", "m1", "oi", Utc::now());

    let error = h.processor.process(&message).await.expect_err("durable write must fail");

    assert!(matches!(error, ProcessError::State(_)));
    assert!(!h.ledger.has_processed(&message.idempotency_key()).await.expect("ledger read"));
    assert_eq!(h.ledger.len().await, 0);
}

#[tokio::test]
async fn own_and_blank_messages_are_ignored() {
    let model = greeting_model();
    let h = harness(model.clone());
    let sender = Arc::new(RecordingSender::default());
    let delivery = Arc::new(DeliveryAgent::new(sender.clone(), 2, Backoff::from_millis(1)));
    let pipeline = MessagePipeline::new(h.processor.clone(), delivery);

    let mut own = envelope("m1");
    own.from_me = true;
    let mut blank = envelope("m2");
    blank.message = "  ".to_string();

    assert_eq!(pipeline.handle(&own).await.expect("own"), PipelineOutcome::Ignored);
    assert_eq!(pipeline.handle(&blank).await.expect("blank"), PipelineOutcome::Ignored);
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    assert!(sender.sent.lock().await.is_empty());
}

fn scheduling_model() -> Arc<FixedModel> {
    Arc::new(FixedModel::new(json!({
        "intent": "scheduling",
        "confidence": 0.88,
        "entities": {
            "student_name": "Ana",
            "student_age": 12,
            "subject": "matemática",
            "preferred_time": "2026-03-10T14:00:00Z"
        }
    })))
}

#[tokio::test]
async fn free_slot_moves_scheduling_to_confirmation() {
    let h = harness(scheduling_model());
    let message = InboundMessage::new("wa:5511", "m1", "terça às 14h", Utc::now());

    let result = h.processor.process(&message).await.expect("processed");

    assert_eq!(result.stage, Stage::Confirmation);
    let state = h
        .store
        .get(&ConversationId("wa:5511".to_string()))
        .await
        .expect("read state")
        .expect("state exists");
    assert_eq!(state.stage, Stage::Confirmation);
    assert_eq!(state.entities.get("student_name"), Some(&json!("Ana")));
    assert!(state.context.contains_key("pending_slot"));
}

#[tokio::test]
async fn busy_slot_keeps_the_conversation_in_scheduling() {
    let h = harness_with(
        scheduling_model(),
        Arc::new(InMemoryConversationRepository::default()),
        Arc::new(BusyCalendar),
    );
    let message = InboundMessage::new("wa:5511", "m1", "terça às 14h", Utc::now());

    let result = h.processor.process(&message).await.expect("processed");

    assert_eq!(result.stage, Stage::Scheduling);
}
