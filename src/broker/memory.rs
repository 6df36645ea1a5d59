//! In-memory broker used by tests and the demo binary.
//!
//! Topics and subscriptions are provisioned explicitly. Each subscription
//! keeps its own delivery queue; a pump task feeds the attached listener and
//! a watcher per delivery records the consumer's decision. Nacked or
//! unresolved messages are requeued until a delivery cap, after which they
//! are dropped so a poisoned message cannot loop forever.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BrokerClient, BrokerDelivery, Decision, SubscriptionEvent, SubscriptionHandle, TopicHandle,
};
use crate::codec::Envelope;
use crate::publisher::PublishReceipt;
use crate::utils::{Error, Result};

const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 5;
const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_millis(10);

/// An in-memory [`BrokerClient`].
///
/// Cloning is cheap and clones share the same topics, subscriptions, and
/// counters.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    max_delivery_attempts: u32,
    redelivery_delay: Duration,
}

#[derive(Debug, Default)]
struct BrokerState {
    /// Topic name to the subscription names fanned out to on publish.
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<String, Arc<SubscriptionCore>>,
}

#[derive(Debug)]
struct SubscriptionCore {
    name: String,
    state: Mutex<SubState>,
    /// Woken when the queue gains a message or a pump must re-check its
    /// generation.
    notify: Notify,
    acked: AtomicUsize,
    nacked: AtomicUsize,
    dead_lettered: AtomicUsize,
    max_delivery_attempts: u32,
    redelivery_delay: Duration,
}

#[derive(Debug, Default)]
struct SubState {
    queue: VecDeque<StoredMessage>,
    /// Bumped on every attach/detach; a pump exits once its generation is
    /// stale.
    generation: u64,
}

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    publish_time: DateTime<Utc>,
    data: Vec<u8>,
    attributes: HashMap<String, String>,
    /// Completed deliveries of this message so far.
    attempts: u32,
}

impl MemoryBroker {
    /// A broker with the default delivery cap (5 attempts per message) and a
    /// 10ms pause before each redelivery.
    pub fn new() -> Self {
        Self::with_delivery_limits(DEFAULT_MAX_DELIVERY_ATTEMPTS, DEFAULT_REDELIVERY_DELAY)
    }

    /// A broker with explicit redelivery tuning. `max_delivery_attempts` is
    /// clamped to at least 1.
    pub fn with_delivery_limits(max_delivery_attempts: u32, redelivery_delay: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            max_delivery_attempts: max_delivery_attempts.max(1),
            redelivery_delay,
        }
    }

    /// Provisions a topic. Idempotent.
    pub async fn create_topic(&self, name: &str) {
        let mut state = self.state.lock().await;
        state.topics.entry(name.to_string()).or_default();
    }

    /// Provisions a subscription bound to `topic`, creating the topic as
    /// needed. Idempotent; re-creating an existing subscription keeps its
    /// queue and counters.
    pub async fn create_subscription(&self, topic: &str, name: &str) {
        let mut state = self.state.lock().await;
        let bound = state.topics.entry(topic.to_string()).or_default();
        if !bound.iter().any(|s| s == name) {
            bound.push(name.to_string());
        }
        let max_delivery_attempts = self.max_delivery_attempts;
        let redelivery_delay = self.redelivery_delay;
        state
            .subscriptions
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(SubscriptionCore {
                    name: name.to_string(),
                    state: Mutex::new(SubState::default()),
                    notify: Notify::new(),
                    acked: AtomicUsize::new(0),
                    nacked: AtomicUsize::new(0),
                    dead_lettered: AtomicUsize::new(0),
                    max_delivery_attempts,
                    redelivery_delay,
                })
            });
    }

    /// Messages acked on `subscription` so far. Zero for unknown names.
    pub async fn acked_count(&self, subscription: &str) -> usize {
        match self.core(subscription).await {
            Some(core) => core.acked.load(Ordering::Relaxed),
            None => 0,
        }
    }

    /// Messages nacked on `subscription` so far. Zero for unknown names.
    pub async fn nacked_count(&self, subscription: &str) -> usize {
        match self.core(subscription).await {
            Some(core) => core.nacked.load(Ordering::Relaxed),
            None => 0,
        }
    }

    /// Messages dropped after exhausting the delivery cap.
    pub async fn dead_lettered_count(&self, subscription: &str) -> usize {
        match self.core(subscription).await {
            Some(core) => core.dead_lettered.load(Ordering::Relaxed),
            None => 0,
        }
    }

    /// Messages queued on `subscription` and not currently delivered.
    pub async fn pending_count(&self, subscription: &str) -> usize {
        match self.core(subscription).await {
            Some(core) => core.state.lock().await.queue.len(),
            None => 0,
        }
    }

    async fn core(&self, name: &str) -> Option<Arc<SubscriptionCore>> {
        self.state.lock().await.subscriptions.get(name).cloned()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn topic(&self, name: &str) -> Result<Arc<dyn TopicHandle>> {
        Ok(Arc::new(MemoryTopic {
            name: name.to_string(),
            state: self.state.clone(),
        }))
    }

    async fn subscription(&self, name: &str) -> Result<Arc<dyn SubscriptionHandle>> {
        Ok(Arc::new(MemorySubscription {
            name: name.to_string(),
            state: self.state.clone(),
        }))
    }

    async fn topic_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().await.topics.contains_key(name))
    }

    async fn subscription_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().await.subscriptions.contains_key(name))
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.state.lock().await.topics.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn list_subscriptions(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .await
            .subscriptions
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }
}

struct MemoryTopic {
    name: String,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl TopicHandle for MemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, envelope: Envelope) -> Result<PublishReceipt> {
        let cores: Vec<Arc<SubscriptionCore>> = {
            let state = self.state.lock().await;
            let Some(bound) = state.topics.get(&self.name) else {
                return Err(Error::publish(&self.name, "topic is not provisioned"));
            };
            bound
                .iter()
                .filter_map(|name| state.subscriptions.get(name).cloned())
                .collect()
        };

        let receipt = PublishReceipt {
            message_id: Uuid::new_v4().to_string(),
        };
        let publish_time = Utc::now();
        // A topic with no subscriptions accepts and discards, like the real
        // service.
        for core in cores {
            let mut sub = core.state.lock().await;
            sub.queue.push_back(StoredMessage {
                message_id: receipt.message_id.clone(),
                publish_time,
                data: envelope.data.clone(),
                attributes: envelope.attributes.clone(),
                attempts: 0,
            });
            drop(sub);
            core.notify.notify_one();
        }
        debug!(topic = %self.name, message_id = %receipt.message_id, "message stored");
        Ok(receipt)
    }
}

struct MemorySubscription {
    name: String,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl SubscriptionHandle for MemorySubscription {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attach(&self, events: mpsc::Sender<SubscriptionEvent>) -> Result<()> {
        let core = {
            let state = self.state.lock().await;
            state.subscriptions.get(&self.name).cloned()
        };
        let Some(core) = core else {
            warn!(subscription = %self.name, "attach to unknown subscription");
            let _ = events
                .send(SubscriptionEvent::TransportError(format!(
                    "subscription `{}` not found",
                    self.name
                )))
                .await;
            return Ok(());
        };

        let generation = {
            let mut sub = core.state.lock().await;
            sub.generation += 1;
            sub.generation
        };
        info!(subscription = %self.name, "listener attached");
        tokio::spawn(run_pump(core, events, generation));
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        let core = {
            let state = self.state.lock().await;
            state.subscriptions.get(&self.name).cloned()
        };
        if let Some(core) = core {
            let mut sub = core.state.lock().await;
            sub.generation += 1;
            drop(sub);
            // Wake the pump so it notices the stale generation.
            core.notify.notify_one();
            info!(subscription = %self.name, "listener detached");
        }
        Ok(())
    }
}

/// Feeds queued messages to one attached listener, one delivery at a time.
/// Exits when its generation goes stale or the listener channel closes.
async fn run_pump(
    core: Arc<SubscriptionCore>,
    events: mpsc::Sender<SubscriptionEvent>,
    generation: u64,
) {
    loop {
        let next = {
            let mut sub = core.state.lock().await;
            if sub.generation != generation {
                drop(sub);
                // Pass the wakeup on in case a newer pump is waiting.
                core.notify.notify_one();
                return;
            }
            sub.queue.pop_front()
        };

        let Some(mut message) = next else {
            core.notify.notified().await;
            continue;
        };

        message.attempts += 1;
        let (responder, decision) = oneshot::channel();
        let delivery = BrokerDelivery {
            message_id: message.message_id.clone(),
            publish_time: message.publish_time,
            data: message.data.clone(),
            attributes: message.attributes.clone(),
            responder,
        };

        if events
            .send(SubscriptionEvent::Delivery(delivery))
            .await
            .is_err()
        {
            // Listener dropped its queue; the message was never seen.
            let mut sub = core.state.lock().await;
            message.attempts -= 1;
            sub.queue.push_front(message);
            if sub.generation == generation {
                sub.generation += 1;
            }
            drop(sub);
            core.notify.notify_one();
            return;
        }

        tokio::spawn(watch_decision(core.clone(), message, decision));
    }
}

/// Waits for the consumer's decision on one delivery. An unresolved drop is
/// treated like a nack, minus the counter.
async fn watch_decision(
    core: Arc<SubscriptionCore>,
    message: StoredMessage,
    decision: oneshot::Receiver<Decision>,
) {
    match decision.await {
        Ok(Decision::Ack) => {
            core.acked.fetch_add(1, Ordering::Relaxed);
            debug!(
                subscription = %core.name,
                message_id = %message.message_id,
                "delivery acked"
            );
        }
        Ok(Decision::Nack) => {
            core.nacked.fetch_add(1, Ordering::Relaxed);
            debug!(
                subscription = %core.name,
                message_id = %message.message_id,
                attempt = message.attempts,
                "delivery nacked"
            );
            requeue(core, message).await;
        }
        Err(_) => {
            debug!(
                subscription = %core.name,
                message_id = %message.message_id,
                "delivery dropped unresolved"
            );
            requeue(core, message).await;
        }
    }
}

async fn requeue(core: Arc<SubscriptionCore>, message: StoredMessage) {
    if message.attempts >= core.max_delivery_attempts {
        core.dead_lettered.fetch_add(1, Ordering::Relaxed);
        warn!(
            subscription = %core.name,
            message_id = %message.message_id,
            attempts = message.attempts,
            "dropping message after repeated redelivery"
        );
        return;
    }
    if !core.redelivery_delay.is_zero() {
        tokio::time::sleep(core.redelivery_delay).await;
    }
    let mut sub = core.state.lock().await;
    sub.queue.push_back(message);
    drop(sub);
    core.notify.notify_one();
}
