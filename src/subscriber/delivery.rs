//! One delivered message and its terminal decision.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::broker::{BrokerDelivery, Decision};
use crate::codec::{self, Payload};
use crate::utils::Result;

const PENDING: u8 = 0;
const ACKED: u8 = 1;
const NACKED: u8 = 2;

/// Local view of the decision recorded on a [`DeliveryHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDecision {
    Pending,
    Acked,
    Nacked,
}

/// One inbound message, owned by the handler invocation processing it.
///
/// The decision transitions `Pending` to `Acked` or `Nacked` exactly once,
/// atomically; whichever of [`accept`](Self::accept) and
/// [`reject`](Self::reject) loses the race is a warned no-op and never
/// reaches the broker. Dropping a handle that is still pending leaves the
/// message unacknowledged, so the broker redelivers it.
#[derive(Debug)]
pub struct DeliveryHandle {
    id: String,
    publish_time: DateTime<Utc>,
    attributes: HashMap<String, String>,
    data: Vec<u8>,
    decision: AtomicU8,
    responder: Mutex<Option<oneshot::Sender<Decision>>>,
}

impl DeliveryHandle {
    pub(crate) fn from_broker(delivery: BrokerDelivery) -> Self {
        Self {
            id: delivery.message_id,
            publish_time: delivery.publish_time,
            attributes: delivery.attributes,
            data: delivery.data,
            decision: AtomicU8::new(PENDING),
            responder: Mutex::new(Some(delivery.responder)),
        }
    }

    /// Broker-assigned message id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the broker accepted the message from its publisher.
    pub fn publish_time(&self) -> DateTime<Utc> {
        self.publish_time
    }

    /// Size of the serialized payload.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Wire attributes that traveled with the message.
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Raw payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decodes the payload carried by this delivery.
    pub fn decode_payload(&self) -> Result<Payload> {
        codec::decode_bytes(&self.data)
    }

    /// The decision recorded so far.
    pub fn decision(&self) -> DeliveryDecision {
        match self.decision.load(Ordering::Acquire) {
            ACKED => DeliveryDecision::Acked,
            NACKED => DeliveryDecision::Nacked,
            _ => DeliveryDecision::Pending,
        }
    }

    /// Marks processing as succeeded and acknowledges to the broker.
    /// No-op after a terminal decision.
    pub fn accept(&self) {
        self.resolve(ACKED, Decision::Ack, "ack");
    }

    /// Marks processing as failed and asks the broker to redeliver.
    /// No-op after a terminal decision.
    pub fn reject(&self) {
        self.resolve(NACKED, Decision::Nack, "nack");
    }

    fn resolve(&self, terminal: u8, decision: Decision, verb: &'static str) {
        match self.decision.compare_exchange(
            PENDING,
            terminal,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let responder = {
                    let mut slot = match self.responder.lock() {
                        Ok(slot) => slot,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    slot.take()
                };
                if let Some(sender) = responder {
                    if sender.send(decision).is_err() {
                        debug!(message_id = %self.id, decision = verb, "broker side gone");
                    } else {
                        debug!(message_id = %self.id, decision = verb, "delivery resolved");
                    }
                }
            }
            Err(_) => {
                warn!(
                    message_id = %self.id,
                    attempted = verb,
                    recorded = ?self.decision(),
                    "ignoring resolution after a terminal decision"
                );
            }
        }
    }
}
