//! Composition root: one publisher plus named subscribers over a shared
//! broker client.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::broker::BrokerClient;
use crate::config::Settings;
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;
use crate::utils::Result;


/// Wires a [`Publisher`] and a set of [`Subscriber`]s to one topic on an
/// injected broker client, and passes broker queries through.
pub struct Manager {
    client: Arc<dyn BrokerClient>,
    topic_name: String,
    publisher: Publisher,
    subscribers: HashMap<String, Arc<Subscriber>>,
    max_in_flight: usize,
}

impl Manager {
    /// A manager publishing to `topic_name`; subscribers are added
    /// separately. `max_in_flight` caps each subscriber's concurrent
    /// deliveries.
    pub async fn new(
        client: Arc<dyn BrokerClient>,
        topic_name: &str,
        max_in_flight: usize,
    ) -> Result<Self> {
        let topic = client.topic(topic_name).await?;
        Ok(Self {
            client,
            topic_name: topic_name.to_string(),
            publisher: Publisher::new(topic),
            subscribers: HashMap::new(),
            max_in_flight,
        })
    }

    /// A manager for the configured topic with one subscriber per
    /// configured subscription name.
    pub async fn from_settings(client: Arc<dyn BrokerClient>, settings: &Settings) -> Result<Self> {
        let mut manager = Self::new(
            client,
            &settings.broker.topic_name,
            settings.delivery.max_in_flight,
        )
        .await?;
        for name in &settings.broker.subscription_names {
            manager.add_subscriber(name).await?;
        }
        Ok(manager)
    }

    /// The topic everything here publishes to.
    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Creates a subscriber for `name`, replacing any previous subscriber
    /// registered under the same name.
    pub async fn add_subscriber(&mut self, name: &str) -> Result<Arc<Subscriber>> {
        let handle = self.client.subscription(name).await?;
        let subscriber = Arc::new(Subscriber::new(handle, self.max_in_flight));
        self.subscribers
            .insert(name.to_string(), Arc::clone(&subscriber));
        info!(subscription = name, "subscriber registered");
        Ok(subscriber)
    }

    pub fn subscriber(&self, name: &str) -> Option<Arc<Subscriber>> {
        self.subscribers.get(name).cloned()
    }

    /// Registered subscription names, sorted.
    pub fn subscriber_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.subscribers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether the managed topic exists on the broker.
    pub async fn check_topic(&self) -> Result<bool> {
        let exists = self.client.topic_exists(&self.topic_name).await?;
        info!(topic = %self.topic_name, exists, "topic checked");
        Ok(exists)
    }

    /// Whether `name` exists as a subscription on the broker.
    pub async fn check_subscription(&self, name: &str) -> Result<bool> {
        let exists = self.client.subscription_exists(name).await?;
        info!(subscription = name, exists, "subscription checked");
        Ok(exists)
    }

    pub async fn list_topics(&self) -> Result<Vec<String>> {
        self.client.list_topics().await
    }

    pub async fn list_subscriptions(&self) -> Result<Vec<String>> {
        self.client.list_subscriptions().await
    }

    /// Stops every registered subscriber. Safe to call twice.
    pub async fn stop_all(&self) -> Result<()> {
        for subscriber in self.subscribers.values() {
            subscriber.stop_listening().await?;
        }
        Ok(())
    }
}
