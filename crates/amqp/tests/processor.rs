//! Message processor tests against an in-memory reply channel.

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};

use scriptgate_amqp::error::AmqpError;
use scriptgate_amqp::message::{InboundMessage, Reply, HEADER_ENDPOINT, HEADER_EXECUTION_ID};
use scriptgate_amqp::processor::{MessageProcessor, ReplyChannel};
use scriptgate_core::dispatcher::Dispatcher;
use scriptgate_core::pool::{ExecutionPool, PoolConfig};
use scriptgate_core::scripting::engine::ScriptError;
use scriptgate_core::status::InvocationStatus;
use scriptgate_core::testing::{failed_output, ok_output, FakeEngine};
use scriptgate_events::{EventBus, Transport};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryChannel {
    fail_publish: bool,
    log: Mutex<Vec<String>>,
    replies: Mutex<Vec<Reply>>,
}

impl MemoryChannel {
    fn failing() -> Self {
        Self {
            fail_publish: true,
            ..Self::default()
        }
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn only_reply(&self) -> Reply {
        let replies = self.replies.lock().unwrap();
        assert_eq!(replies.len(), 1, "exactly one reply per delivery");
        replies[0].clone()
    }
}

impl ReplyChannel for MemoryChannel {
    async fn publish(&self, reply: &Reply) -> Result<(), AmqpError> {
        if self.fail_publish {
            return Err(AmqpError::Unavailable("broker gone".into()));
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("publish:{}", reply.correlation_id.as_deref().unwrap_or("-")));
        self.replies.lock().unwrap().push(reply.clone());
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.log.lock().unwrap().push(format!("ack:{delivery_tag}"));
        Ok(())
    }
}

async fn processor(engine: FakeEngine) -> (MessageProcessor<FakeEngine>, Arc<EventBus>) {
    let config = PoolConfig {
        min_size: 1,
        max_size: Some(2),
        ..PoolConfig::default()
    };
    let pool = ExecutionPool::start(engine, config).await.unwrap();
    let events = Arc::new(EventBus::default());
    (
        MessageProcessor::new(Dispatcher::new(Arc::new(pool)), Arc::clone(&events)),
        events,
    )
}

fn message(tag: u64, execution_id: Option<&str>, endpoint: Option<&str>, body: &str) -> InboundMessage {
    let mut headers = FieldTable::default();
    if let Some(id) = execution_id {
        headers.insert(
            ShortString::from(HEADER_EXECUTION_ID),
            AMQPValue::LongString(LongString::from(id)),
        );
    }
    if let Some(endpoint) = endpoint {
        headers.insert(
            ShortString::from(HEADER_ENDPOINT),
            AMQPValue::LongString(LongString::from(endpoint)),
        );
    }
    InboundMessage {
        delivery_tag: tag,
        headers,
        body: body.as_bytes().to_vec(),
        ..InboundMessage::default()
    }
}

fn body_text(reply: &Reply) -> String {
    String::from_utf8(reply.body.clone()).unwrap()
}

// ---------------------------------------------------------------------------
// Test: successful invocations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn output_is_replied_with_200_then_acked() {
    let (processor, _) = processor(FakeEngine::echo()).await;
    let channel = MemoryChannel::default();

    let status = processor
        .process(&channel, message(1, Some("exec-1"), Some("ns/cmd"), r#"{"a":"1"}"#))
        .await
        .unwrap();

    assert_eq!(status, InvocationStatus::Ok);
    assert_eq!(channel.log(), ["publish:exec-1", "ack:1"]);

    let reply = channel.only_reply();
    assert_eq!(reply.status_code(), Some(200));
    assert_eq!(body_text(&reply), "ns/cmd\na=1");
    assert_eq!(
        reply.headers.inner().get(&ShortString::from(HEADER_ENDPOINT)),
        Some(&AMQPValue::LongString(LongString::from("ns/cmd")))
    );
}

#[tokio::test]
async fn reports_daily_scenario_replies_ok_with_echoed_token() {
    let engine = FakeEngine::new(|_, _| Ok(ok_output(["OK"])));
    let (processor, _) = processor(engine.clone()).await;
    let channel = MemoryChannel::default();

    let status = processor
        .process(
            &channel,
            message(11, Some("exec-77"), Some("reports/daily"), r#"{"env":"prod"}"#),
        )
        .await
        .unwrap();

    assert_eq!(status, InvocationStatus::Ok);
    let reply = channel.only_reply();
    assert_eq!(reply.status_code(), Some(200));
    assert_eq!(reply.correlation_id.as_deref(), Some("exec-77"));
    assert_eq!(
        reply.headers.inner().get(&ShortString::from(HEADER_EXECUTION_ID)),
        Some(&AMQPValue::LongString(LongString::from("exec-77")))
    );
    assert_eq!(body_text(&reply), "OK");
    assert_eq!(channel.log(), ["publish:exec-77", "ack:11"]);

    let (target, params) = engine.last_request().unwrap();
    assert_eq!(target, "reports/daily");
    assert_eq!(params.get("env"), Some(Some("prod")));
    assert_eq!(params.len(), 1);
}

#[tokio::test]
async fn empty_output_is_204_with_empty_body() {
    let engine = FakeEngine::new(|_, _| Ok(ok_output(Vec::<String>::new())));
    let (processor, _) = processor(engine).await;
    let channel = MemoryChannel::default();

    let status = processor
        .process(&channel, message(2, Some("e"), Some("quiet"), ""))
        .await
        .unwrap();

    assert_eq!(status, InvocationStatus::NoContent);
    assert!(channel.only_reply().body.is_empty());
}

// ---------------------------------------------------------------------------
// Test: failures are still replied and acknowledged
// ---------------------------------------------------------------------------

#[tokio::test]
async fn engine_reported_failure_is_500_with_error_text() {
    let engine = FakeEngine::new(|_, _| Ok(failed_output(1, "Cannot find path")));
    let (processor, _) = processor(engine).await;
    let channel = MemoryChannel::default();

    let status = processor
        .process(&channel, message(3, Some("e"), Some("broken"), ""))
        .await
        .unwrap();

    assert_eq!(status, InvocationStatus::ServerError);
    assert_eq!(body_text(&channel.only_reply()), "Cannot find path");
    assert_eq!(channel.log(), ["publish:e", "ack:3"]);
}

#[tokio::test]
async fn engine_fault_is_500() {
    let engine = FakeEngine::new(|t, _| Err(ScriptError::NotFound(t.to_string())));
    let (processor, _) = processor(engine).await;
    let channel = MemoryChannel::default();

    processor
        .process(&channel, message(4, Some("e"), Some("nope"), ""))
        .await
        .unwrap();

    let reply = channel.only_reply();
    assert_eq!(reply.status_code(), Some(500));
    assert_eq!(body_text(&reply), "Script not found: nope");
}

#[tokio::test]
async fn missing_endpoint_is_400_and_never_reaches_the_pool() {
    let engine = FakeEngine::echo();
    let (processor, _) = processor(engine.clone()).await;
    let channel = MemoryChannel::default();

    let status = processor
        .process(&channel, message(5, Some("e"), None, "{}"))
        .await
        .unwrap();

    assert_eq!(status, InvocationStatus::BadRequest);
    assert!(body_text(&channel.only_reply()).starts_with("ERROR: Invalid target"));
    assert_eq!(channel.log(), ["publish:e", "ack:5"]);
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn missing_correlation_is_400_acked_and_never_reaches_the_pool() {
    let engine = FakeEngine::echo();
    let (processor, events) = processor(engine.clone()).await;
    let mut rx = events.subscribe();
    let channel = MemoryChannel::default();

    let status = processor
        .process(&channel, message(42, None, Some("ns/cmd"), "{}"))
        .await
        .unwrap();

    assert_eq!(status, InvocationStatus::BadRequest);
    assert_eq!(channel.log(), ["publish:-", "ack:42"]);
    let reply = channel.only_reply();
    assert_eq!(reply.status_code(), Some(400));
    assert_eq!(reply.correlation_id, None);
    assert!(body_text(&reply).starts_with("ERROR: Missing correlation token"));
    assert_eq!(engine.calls(), 0);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.status, 400);
    assert_eq!(event.correlation_id, "");
}

#[tokio::test]
async fn empty_correlation_sources_count_as_missing() {
    let engine = FakeEngine::echo();
    let (processor, _) = processor(engine.clone()).await;
    let channel = MemoryChannel::default();

    let mut msg = message(43, Some(""), Some("ns/cmd"), "");
    msg.correlation_id = Some(String::new());
    let status = processor.process(&channel, msg).await.unwrap();

    assert_eq!(status, InvocationStatus::BadRequest);
    assert_eq!(channel.log(), ["publish:-", "ack:43"]);
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn malformed_body_is_400() {
    let engine = FakeEngine::echo();
    let (processor, _) = processor(engine.clone()).await;
    let channel = MemoryChannel::default();

    let status = processor
        .process(&channel, message(6, Some("e"), Some("cmd"), r#"{"list":[1]}"#))
        .await
        .unwrap();

    assert_eq!(status, InvocationStatus::BadRequest);
    assert_eq!(channel.only_reply().status_code(), Some(400));
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn traversal_endpoint_is_400() {
    let engine = FakeEngine::echo();
    let (processor, _) = processor(engine.clone()).await;
    let channel = MemoryChannel::default();

    let status = processor
        .process(&channel, message(7, Some("e"), Some("../etc/passwd"), ""))
        .await
        .unwrap();

    assert_eq!(status, InvocationStatus::BadRequest);
    assert_eq!(engine.calls(), 0);
}

// ---------------------------------------------------------------------------
// Test: acknowledgment discipline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_publish_leaves_delivery_unacknowledged() {
    let (processor, _) = processor(FakeEngine::echo()).await;
    let channel = MemoryChannel::failing();

    let result = processor
        .process(&channel, message(8, Some("e"), Some("cmd"), ""))
        .await;

    assert_matches!(result, Err(AmqpError::Unavailable(_)));
    assert!(channel.log().is_empty(), "no ack without a published reply");
}

// ---------------------------------------------------------------------------
// Test: correlation and events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn correlation_property_is_used_when_header_absent() {
    let (processor, _) = processor(FakeEngine::echo()).await;
    let channel = MemoryChannel::default();

    let mut msg = message(9, None, Some("cmd"), "");
    msg.correlation_id = Some("prop-42".into());
    processor.process(&channel, msg).await.unwrap();

    let reply = channel.only_reply();
    assert_eq!(reply.correlation_id.as_deref(), Some("prop-42"));
    assert_eq!(
        reply.properties().correlation_id().as_ref().map(|c| c.as_str()),
        Some("prop-42")
    );
}

#[tokio::test]
async fn every_delivery_publishes_an_event() {
    let (processor, events) = processor(FakeEngine::echo()).await;
    let mut rx = events.subscribe();
    let channel = MemoryChannel::default();

    processor
        .process(&channel, message(10, Some("exec-9"), Some("ns/cmd"), ""))
        .await
        .unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.transport, Transport::Amqp);
    assert_eq!(event.target, "ns/cmd");
    assert_eq!(event.correlation_id, "exec-9");
    assert_eq!(event.status, 200);
    assert_eq!(event.result_bytes, "ns/cmd".len());
}

#[tokio::test]
async fn concurrent_deliveries_get_their_own_replies() {
    let (processor, _) = processor(FakeEngine::echo()).await;
    let channel = Arc::new(MemoryChannel::default());

    let handles: Vec<_> = (0..6u64)
        .map(|i| {
            let processor = processor.clone();
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                let msg = message(i, Some(&format!("exec-{i}")), Some(&format!("job/n{i}")), "");
                processor.process(channel.as_ref(), msg).await.unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), InvocationStatus::Ok);
    }

    let replies = channel.replies.lock().unwrap();
    assert_eq!(replies.len(), 6);
    for reply in replies.iter() {
        let n = reply.correlation_id.as_deref().unwrap().trim_start_matches("exec-");
        assert_eq!(body_text(reply), format!("job/n{n}"));
    }
}
