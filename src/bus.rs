//! In-process publish/subscribe topic bus.
//!
//! Controllers talk to the outside world exclusively through named topics carrying
//! primitive numeric messages (`Float64`, `Int32`). [`LocalBus`] keeps one Tokio
//! `broadcast` channel per topic plus a bus-wide tap that sees every publication; the
//! stdio relay uses the tap to forward traffic to other processes.
//!
//! # Data Flow
//!
//! ```text
//! Publisher --[Envelope]--> topic channel --> Subscription(s)
//!                      \--> tap ----------> relay (stdout)
//! ```
//!
//! Topic queues hold a single message, like a depth-1 subscriber queue: a subscriber
//! that falls behind skips straight to the newest message. Latched topics additionally
//! replay their last message to every new subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::error::{AppResult, BridgeError};

/// Per-topic queue depth.
const TOPIC_QUEUE_DEPTH: usize = 1;

/// Capacity of the bus-wide tap; the relay drains it continuously.
const TAP_CAPACITY: usize = 256;

/// Primitive type carried by a topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// 64-bit float (frequency, power, temperature)
    Float64,
    /// 32-bit signed integer (output on/off)
    Int32,
}

/// A single message on a topic.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    /// 64-bit float payload
    Float64(f64),
    /// 32-bit signed integer payload
    Int32(i32),
}

impl Message {
    /// The primitive type of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Float64(_) => MessageKind::Float64,
            Message::Int32(_) => MessageKind::Int32,
        }
    }

    /// Numeric value widened to `f64`.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Message::Float64(v) => v,
            Message::Int32(v) => f64::from(v),
        }
    }
}

/// A message together with the topic it was published on and the publication time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic name
    pub topic: String,
    /// UTC publication timestamp
    pub stamp: DateTime<Utc>,
    /// Payload
    pub message: Message,
}

struct Topic {
    kind: MessageKind,
    latch: bool,
    latched: Option<Envelope>,
    sender: broadcast::Sender<Envelope>,
}

impl Topic {
    fn new(kind: MessageKind) -> Self {
        let (sender, _) = broadcast::channel(TOPIC_QUEUE_DEPTH);
        Self {
            kind,
            latch: false,
            latched: None,
            sender,
        }
    }
}

struct BusInner {
    topics: Mutex<HashMap<String, Topic>>,
    tap: broadcast::Sender<Envelope>,
}

/// In-process topic registry. Cheap to clone; clones share the same topics.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                topics: Mutex::new(HashMap::new()),
                tap,
            }),
        }
    }

    /// Registers an outbound publisher on `topic`.
    ///
    /// The topic is created on first use. A latched publisher makes the topic replay its
    /// last message to subscribers that arrive later.
    ///
    /// # Errors
    /// [`BridgeError::TopicType`] if the topic already carries another message kind.
    pub fn advertise(&self, topic: &str, kind: MessageKind, latch: bool) -> AppResult<Publisher> {
        let mut topics = self.lock_topics();
        let entry = Self::entry(&mut topics, topic, kind)?;
        entry.latch |= latch;
        debug!(topic, ?kind, latch, "Advertised topic");
        Ok(Publisher {
            topic: topic.to_string(),
            kind,
            bus: self.clone(),
        })
    }

    /// Registers an inbound subscription on `topic`.
    ///
    /// # Errors
    /// [`BridgeError::TopicType`] if the topic already carries another message kind.
    pub fn subscribe(&self, topic: &str, kind: MessageKind) -> AppResult<Subscription> {
        let mut topics = self.lock_topics();
        let entry = Self::entry(&mut topics, topic, kind)?;
        debug!(topic, ?kind, "Subscribed to topic");
        Ok(Subscription {
            topic: topic.to_string(),
            pending: entry.latched.clone(),
            receiver: entry.sender.subscribe(),
        })
    }

    /// Publishes a message on `topic` without a registered publisher.
    ///
    /// Used by the relay to feed inbound command messages into the bus.
    pub fn inject(&self, topic: &str, message: Message) -> AppResult<Envelope> {
        self.deliver(topic, message)
    }

    /// Receiver that observes every message published on any topic.
    pub fn tap(&self) -> broadcast::Receiver<Envelope> {
        self.inner.tap.subscribe()
    }

    /// Last message of a latched topic, if any.
    pub fn latest(&self, topic: &str) -> Option<Envelope> {
        self.lock_topics()
            .get(topic)
            .and_then(|t| t.latched.clone())
    }

    fn deliver(&self, topic: &str, message: Message) -> AppResult<Envelope> {
        let envelope = Envelope {
            topic: topic.to_string(),
            stamp: Utc::now(),
            message,
        };
        {
            let mut topics = self.lock_topics();
            let entry = Self::entry(&mut topics, topic, message.kind())?;
            if entry.latch {
                entry.latched = Some(envelope.clone());
            }
            // No subscribers is not an error.
            let _ = entry.sender.send(envelope.clone());
        }
        let _ = self.inner.tap.send(envelope.clone());
        Ok(envelope)
    }

    fn entry<'a>(
        topics: &'a mut HashMap<String, Topic>,
        topic: &str,
        kind: MessageKind,
    ) -> AppResult<&'a mut Topic> {
        let entry = topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(kind));
        if entry.kind != kind {
            return Err(BridgeError::TopicType {
                topic: topic.to_string(),
                expected: entry.kind,
                actual: kind,
            });
        }
        Ok(entry)
    }

    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, Topic>> {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outbound handle for one topic.
#[derive(Clone)]
pub struct Publisher {
    topic: String,
    kind: MessageKind,
    bus: LocalBus,
}

impl Publisher {
    /// Topic this publisher writes to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes `message`.
    ///
    /// # Errors
    /// [`BridgeError::TopicType`] if `message` does not match the advertised kind.
    pub fn publish(&self, message: Message) -> AppResult<()> {
        if message.kind() != self.kind {
            return Err(BridgeError::TopicType {
                topic: self.topic.clone(),
                expected: self.kind,
                actual: message.kind(),
            });
        }
        self.bus.deliver(&self.topic, message)?;
        Ok(())
    }
}

/// Inbound handle for one topic.
pub struct Subscription {
    topic: String,
    pending: Option<Envelope>,
    receiver: broadcast::Receiver<Envelope>,
}

impl Subscription {
    /// Waits for the next message. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if let Some(latched) = self.pending.take() {
            return Some(latched);
        }
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Dropped stale messages");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
