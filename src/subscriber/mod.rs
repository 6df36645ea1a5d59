//! Inbound consumption: the subscription listener, delivery handles,
//! handlers, and bounded retry.

pub mod delivery;
pub mod handler;
pub mod listener;
pub mod retry;

pub use delivery::{DeliveryDecision, DeliveryHandle};
pub use handler::{DefaultHandler, MessageHandler};
pub use listener::{ListenerState, Subscriber};
pub use retry::{RetryPolicy, RetryState, RetryingHandler, Sleeper, TokioSleeper};

#[cfg(test)]
mod tests;
