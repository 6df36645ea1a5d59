//! Subscription listener: lifecycle and the delivery drain worker.

use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::delivery::DeliveryHandle;
use super::handler::{DefaultHandler, MessageHandler};
use crate::broker::{SubscriptionEvent, SubscriptionHandle};
use crate::utils::Result;

/// Lifecycle of a [`Subscriber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Never started.
    Idle,
    /// Attached and draining deliveries.
    Listening,
    /// Detached after listening.
    Stopped,
}

/// Consumes one subscription, handing each delivery to a handler.
///
/// Deliveries arrive on a bounded queue sized `max_in_flight`; a drain
/// worker dispatches each to its own task, holding concurrent handler
/// invocations at `max_in_flight` with a semaphore. A full queue
/// backpressures the broker rather than buffering locally.
pub struct Subscriber {
    name: String,
    subscription: Arc<dyn SubscriptionHandle>,
    max_in_flight: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ListenerState,
    worker: Option<JoinHandle<()>>,
}

impl Subscriber {
    /// `max_in_flight` is clamped to at least 1.
    pub fn new(subscription: Arc<dyn SubscriptionHandle>, max_in_flight: usize) -> Self {
        Self {
            name: subscription.name().to_string(),
            subscription,
            max_in_flight: max_in_flight.max(1),
            inner: Mutex::new(Inner {
                state: ListenerState::Idle,
                worker: None,
            }),
        }
    }

    /// The subscription this listener consumes from.
    pub fn subscription_name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ListenerState {
        self.inner.lock().await.state
    }

    /// Attaches to the subscription and starts dispatching deliveries to
    /// `handler`. A warned no-op while already listening; restarting a
    /// stopped listener is allowed.
    pub async fn start_listening(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == ListenerState::Listening {
            warn!(subscription = %self.name, "already listening, start ignored");
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(self.max_in_flight);
        self.subscription.attach(tx).await?;
        inner.worker = Some(tokio::spawn(drain(
            self.name.clone(),
            rx,
            handler,
            self.max_in_flight,
        )));
        inner.state = ListenerState::Listening;
        info!(
            subscription = %self.name,
            max_in_flight = self.max_in_flight,
            "listening"
        );
        Ok(())
    }

    /// Starts listening with the [`DefaultHandler`].
    pub async fn start_with_default_handler(&self) -> Result<()> {
        self.start_listening(Arc::new(DefaultHandler)).await
    }

    /// Detaches from the subscription and stops the drain worker.
    ///
    /// Handler invocations already in flight are neither awaited nor
    /// cancelled; deliveries still queued go back to the broker
    /// unacknowledged. Idempotent, and a no-op when not listening.
    pub async fn stop_listening(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != ListenerState::Listening {
            debug!(subscription = %self.name, state = ?inner.state, "stop ignored");
            return Ok(());
        }

        self.subscription.detach().await?;
        if let Some(worker) = inner.worker.take() {
            worker.abort();
        }
        inner.state = ListenerState::Stopped;
        info!(subscription = %self.name, "stopped listening");
        Ok(())
    }
}

/// Drains the delivery queue, one handler task per delivery, at most
/// `max_in_flight` running at once.
async fn drain(
    subscription: String,
    mut events: mpsc::Receiver<SubscriptionEvent>,
    handler: Arc<dyn MessageHandler>,
    max_in_flight: usize,
) {
    let permits = Arc::new(Semaphore::new(max_in_flight));
    while let Some(event) = events.recv().await {
        match event {
            SubscriptionEvent::Delivery(delivery) => {
                let permit = match Arc::clone(&permits).acquire_owned().await {
                    Ok(permit) => permit,
                    // The semaphore is never closed.
                    Err(_) => break,
                };
                let invocation = handler.handle(DeliveryHandle::from_broker(delivery));
                tokio::spawn(async move {
                    invocation.await;
                    drop(permit);
                });
            }
            SubscriptionEvent::TransportError(reason) => {
                error!(subscription = %subscription, %reason, "subscription transport error");
            }
        }
    }
    debug!(subscription = %subscription, "delivery queue closed");
}
