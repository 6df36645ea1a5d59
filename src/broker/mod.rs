//! The broker collaborator seam.
//!
//! Everything the publish/subscribe layer needs from the managed broker is
//! expressed through three object-safe traits: [`BrokerClient`] hands out
//! handles and answers existence/listing queries, [`TopicHandle`] accepts
//! outbound envelopes, and [`SubscriptionHandle`] pushes inbound
//! [`SubscriptionEvent`]s into a channel owned by the subscriber. The traits
//! are injected wherever the layer is composed, so tests and the demo binary
//! run against the in-memory [`MemoryBroker`] while a production build would
//! wire a real transport behind the same seam.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::codec::Envelope;
use crate::publisher::PublishReceipt;
use crate::utils::Result;

pub mod memory;

pub use memory::MemoryBroker;


/// Terminal decision a consumer reports for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Processing succeeded; the broker may discard the message.
    Ack,
    /// Processing failed; the broker should redeliver.
    Nack,
}

/// One inbound message as handed over by the broker, paired with the
/// one-shot channel its terminal decision travels back on.
///
/// Dropping the responder without sending counts as "unresolved": the broker
/// treats the message as unacknowledged and redelivers it.
#[derive(Debug)]
pub struct BrokerDelivery {
    pub message_id: String,
    pub publish_time: DateTime<Utc>,
    pub data: Vec<u8>,
    pub attributes: HashMap<String, String>,
    pub responder: oneshot::Sender<Decision>,
}

/// What an attached subscription pushes to its listener.
#[derive(Debug)]
pub enum SubscriptionEvent {
    /// A message delivery awaiting a terminal decision.
    Delivery(BrokerDelivery),
    /// A transport-level failure. The stream keeps running; the listener is
    /// expected to log and carry on.
    TransportError(String),
}

/// Entry point to the broker: hands out topic/subscription handles and
/// answers the queries the manager exposes.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Returns a handle for publishing to `name`.
    ///
    /// Obtaining a handle does not verify existence; publishing to a topic
    /// the broker does not know fails at publish time.
    async fn topic(&self, name: &str) -> Result<Arc<dyn TopicHandle>>;

    /// Returns a handle for consuming from `name`.
    ///
    /// As with [`BrokerClient::topic`], existence is checked at use time:
    /// attaching to an unknown subscription surfaces a
    /// [`SubscriptionEvent::TransportError`] instead of failing here.
    async fn subscription(&self, name: &str) -> Result<Arc<dyn SubscriptionHandle>>;

    /// Whether the topic exists on the broker.
    async fn topic_exists(&self, name: &str) -> Result<bool>;

    /// Whether the subscription exists on the broker.
    async fn subscription_exists(&self, name: &str) -> Result<bool>;

    /// Names of all topics visible to this client.
    async fn list_topics(&self) -> Result<Vec<String>>;

    /// Names of all subscriptions visible to this client.
    async fn list_subscriptions(&self) -> Result<Vec<String>>;
}

/// Outbound half of the seam: one topic, accepting envelopes.
#[async_trait]
pub trait TopicHandle: Send + Sync {
    /// The topic this handle publishes to.
    fn name(&self) -> &str;

    /// Submits one envelope, returning the broker-assigned message id.
    async fn publish(&self, envelope: Envelope) -> Result<PublishReceipt>;
}

/// Inbound half of the seam: one subscription, pushing events.
#[async_trait]
pub trait SubscriptionHandle: Send + Sync {
    /// The subscription this handle consumes from.
    fn name(&self) -> &str;

    /// Starts pushing subscription events into `events`.
    ///
    /// At most one listener is attached at a time; attaching again replaces
    /// the previous listener. The sender is bounded, so a slow consumer
    /// backpressures the broker instead of piling deliveries up locally.
    async fn attach(&self, events: mpsc::Sender<SubscriptionEvent>) -> Result<()>;

    /// Stops pushing events. Deliveries already queued behind the detached
    /// listener stay with the broker, unacknowledged.
    async fn detach(&self) -> Result<()>;
}
