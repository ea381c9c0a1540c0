//! Shared wiring for the relay integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use relaykit_core::environment::Clock;
use relaykit_core::config::{ConsumerTopicConfig, MessagingConfig, StreamConnectionConfig, TopicConfig};
use relaykit_core::{PipelineError, RequestContext};
use relaykit_relay::{
    MessageProcessor, Producer, ProducerSlot, RelaySettings, StreamRegistry, TopicHandler, commands,
};
use relaykit_runtime::Pipeline;
use relaykit_testing::{
    InMemoryEventStream, InMemoryInbox, InMemoryOutbox, InMemoryQueue, ManualClock, test_clock,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NAMESPACE: &str = "billing";
pub const ORDERS: &str = "Orders";
pub const ORDERS_TOPIC: &str = "orders.v1";
pub const AUDIT: &str = "Audit";
pub const AUDIT_TOPIC: &str = "audit.v1";

/// Settings with `Orders` consumed normally and `Audit` redirected to the queue.
pub fn settings(save_to_db: bool, parallel: bool) -> RelaySettings {
    let topic = |name: &str, value: &str| TopicConfig {
        name: name.to_string(),
        value: value.to_string(),
        group_name: "billing".to_string(),
    };
    let consumer = |name: &str| ConsumerTopicConfig {
        name: name.to_string(),
        connection: "main".to_string(),
        parallel,
    };

    RelaySettings {
        namespace: NAMESPACE.to_string(),
        messaging: MessagingConfig {
            save_to_db,
            message_to_process: 25,
            connections: vec![StreamConnectionConfig {
                name: "main".to_string(),
                brokers: "localhost:9092".to_string(),
                topics: vec![topic(ORDERS, ORDERS_TOPIC), topic(AUDIT, AUDIT_TOPIC)],
            }],
            consumer_topics: vec![consumer(ORDERS), consumer(AUDIT)],
            redirect_to_queue: vec![AUDIT.to_string()],
            ..MessagingConfig::default()
        },
        changelog_days: 14,
    }
}

/// What the scripted topic handler does with the next messages.
#[derive(Debug, Clone)]
pub enum Script {
    Accept,
    RateLimited,
    Reject,
}

/// Topic handler that follows a [`Script`] and records every payload it sees.
#[derive(Debug)]
pub struct ScriptedHandler {
    script: Mutex<Script>,
    seen: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopicHandler for ScriptedHandler {
    async fn handle(&self, message: &str, _ctx: &RequestContext) -> Result<(), PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(message.to_string());
        let script = self.script.lock().unwrap().clone();
        match script {
            Script::Accept => Ok(()),
            Script::RateLimited => Err(PipelineError::RateLimited {
                request: "ApplyOrderCommand".to_string(),
                retry_after: Duration::from_secs(1),
            }),
            Script::Reject => Err(PipelineError::BadRequest(format!("cannot apply {message}"))),
        }
    }
}

/// In-memory collaborators wired into a pipeline and producer.
pub struct Relay {
    pub stream: InMemoryEventStream,
    pub queue: InMemoryQueue,
    pub outbox: InMemoryOutbox,
    pub inbox: InMemoryInbox,
    pub clock: ManualClock,
    pub handler: Arc<ScriptedHandler>,
    pub processor: Arc<MessageProcessor>,
    pub pipeline: Arc<Pipeline>,
    pub producer: Arc<Producer>,
    pub settings: RelaySettings,
}

impl Relay {
    pub fn new(settings: RelaySettings) -> Self {
        let stream = InMemoryEventStream::new();
        let queue = InMemoryQueue::new();
        let outbox = InMemoryOutbox::new();
        let inbox = InMemoryInbox::new();
        let clock = ManualClock::new(test_clock().now());
        let handler = ScriptedHandler::new(Script::Accept);
        let processor = Arc::new(MessageProcessor::new().with_handler(ORDERS, handler.clone()));

        let slot = ProducerSlot::new();
        let pipeline = Arc::new(
            commands::register(
                Pipeline::builder().namespace(NAMESPACE),
                Arc::new(outbox.clone()),
                Arc::new(inbox.clone()),
                &slot,
            )
            .build()
            .unwrap(),
        );
        let producer = Arc::new(
            Producer::new(
                Arc::clone(&pipeline),
                streams(&stream),
                Arc::new(queue.clone()),
                settings.clone(),
            )
            .with_clock(Arc::new(clock.clone())),
        );
        assert!(slot.bind(&producer));

        Self {
            stream,
            queue,
            outbox,
            inbox,
            clock,
            handler,
            processor,
            pipeline,
            producer,
            settings,
        }
    }

    pub fn streams(&self) -> StreamRegistry {
        streams(&self.stream)
    }
}

fn streams(stream: &InMemoryEventStream) -> StreamRegistry {
    StreamRegistry::new().with("main", Arc::new(stream.clone()))
}
