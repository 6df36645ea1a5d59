//! Outbound publishing to a single topic.

use std::sync::Arc;

use tracing::{error, info};

use crate::broker::TopicHandle;
use crate::codec::{self, Payload};
use crate::utils::Result;


/// Broker confirmation for one published envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Broker-assigned id, unique within the topic for its retention window.
    pub message_id: String,
}

/// Publishes application payloads to the one topic it owns.
#[derive(Clone)]
pub struct Publisher {
    topic: Arc<dyn TopicHandle>,
}

impl Publisher {
    pub fn new(topic: Arc<dyn TopicHandle>) -> Self {
        Self { topic }
    }

    /// The topic this publisher emits to.
    pub fn topic_name(&self) -> &str {
        self.topic.name()
    }

    /// Encodes one payload and submits it.
    ///
    /// Submission failures surface as [`crate::utils::Error::Publish`];
    /// nothing is retried here.
    pub async fn publish_message(&self, payload: &Payload) -> Result<PublishReceipt> {
        let envelope = codec::encode(payload)?;
        match self.topic.publish(envelope).await {
            Ok(receipt) => {
                info!(
                    topic = %self.topic.name(),
                    message_id = %receipt.message_id,
                    "message published"
                );
                Ok(receipt)
            }
            Err(err) => {
                error!(topic = %self.topic.name(), error = %err, "publish failed");
                Err(err)
            }
        }
    }

    /// Publishes a batch sequentially, one in-flight publish at a time.
    ///
    /// Receipts come back in submission order, one per payload. The first
    /// failure aborts the whole call with no receipts, including for
    /// payloads the broker had already accepted.
    pub async fn publish_batch(&self, payloads: &[Payload]) -> Result<Vec<PublishReceipt>> {
        let mut receipts = Vec::with_capacity(payloads.len());
        for (index, payload) in payloads.iter().enumerate() {
            match self.publish_message(payload).await {
                Ok(receipt) => receipts.push(receipt),
                Err(err) => {
                    error!(
                        topic = %self.topic.name(),
                        index,
                        published = receipts.len(),
                        "batch aborted"
                    );
                    return Err(err);
                }
            }
        }
        info!(
            topic = %self.topic.name(),
            count = receipts.len(),
            "batch published"
        );
        Ok(receipts)
    }
}
