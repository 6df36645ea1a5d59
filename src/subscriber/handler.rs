//! Handler seam between the listener and application code.

use futures::future::BoxFuture;
use tracing::{info, warn};

use super::delivery::DeliveryHandle;

/// Processes one delivery.
///
/// The handler owns the handle for the length of the invocation and is
/// expected to resolve it with [`DeliveryHandle::accept`] or
/// [`DeliveryHandle::reject`]. A handle left pending when the invocation
/// ends goes back to the broker unacknowledged and will be redelivered.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, delivery: DeliveryHandle) -> BoxFuture<'static, ()>;
}

/// The handler used when a caller does not supply one.
///
/// Decodes the payload, logs it, and accepts; a payload that does not parse
/// is rejected so the broker redelivers it. That keeps the baseline
/// at-least-once: malformed messages come back until a stricter handler or
/// the broker's delivery cap deals with them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandler;

impl MessageHandler for DefaultHandler {
    fn handle(&self, delivery: DeliveryHandle) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            match delivery.decode_payload() {
                Ok(payload) => {
                    info!(
                        message_id = %delivery.id(),
                        tipo = payload.tipo().unwrap_or("other"),
                        size_bytes = delivery.size_bytes(),
                        publish_time = %delivery.publish_time(),
                        "message received"
                    );
                    delivery.accept();
                }
                Err(err) => {
                    warn!(
                        message_id = %delivery.id(),
                        error = %err,
                        "rejecting message that does not decode"
                    );
                    delivery.reject();
                }
            }
        })
    }
}
