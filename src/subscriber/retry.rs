//! Bounded local retry around a processing function.
//!
//! A [`RetryingHandler`] re-runs its processor against the same
//! [`DeliveryHandle`] without any broker round-trip: the message simply
//! stays unacknowledged between attempts. Exactly one terminal call is made
//! per delivery, accept on the first success or reject once attempts are
//! exhausted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::delivery::DeliveryHandle;
use super::handler::MessageHandler;
use crate::utils::Result;

/// Puts retry waits behind a seam tests can intercept.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How many attempts a processor gets for one delivery and how long to
/// pause between them.
///
/// The pause is a timed suspension, never a blocked thread. Note the
/// message stays unacknowledged for up to `max_attempts x backoff`, which
/// must fit inside the broker's ack deadline; that tuning belongs to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    /// Three attempts, one second apart.
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Attempt bookkeeping scoped to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
}

impl RetryState {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
        }
    }

    /// Failed attempts recorded so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Records a failed attempt; true while another attempt is allowed.
    fn record_failure(&mut self) -> bool {
        self.attempt += 1;
        self.attempt < self.max_attempts
    }
}

/// Inner processing function: the delivery plus the 1-based attempt number.
pub type Processor =
    dyn Fn(Arc<DeliveryHandle>, u32) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// A [`MessageHandler`] that retries a processing function per
/// [`RetryPolicy`] before rejecting.
pub struct RetryingHandler {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    processor: Arc<Processor>,
}

impl RetryingHandler {
    pub fn new<F, Fut>(policy: RetryPolicy, processor: F) -> Self
    where
        F: Fn(Arc<DeliveryHandle>, u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::with_sleeper(policy, processor, Arc::new(TokioSleeper))
    }

    /// As [`RetryingHandler::new`], with the wait seam swapped out.
    pub fn with_sleeper<F, Fut>(policy: RetryPolicy, processor: F, sleeper: Arc<dyn Sleeper>) -> Self
    where
        F: Fn(Arc<DeliveryHandle>, u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let processor: Arc<Processor> =
            Arc::new(move |delivery, attempt| Box::pin(processor(delivery, attempt)));
        Self {
            policy,
            sleeper,
            processor,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

impl MessageHandler for RetryingHandler {
    fn handle(&self, delivery: DeliveryHandle) -> BoxFuture<'static, ()> {
        let policy = self.policy;
        let sleeper = Arc::clone(&self.sleeper);
        let processor = Arc::clone(&self.processor);
        Box::pin(run_with_retry(policy, sleeper, processor, delivery))
    }
}

async fn run_with_retry(
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    processor: Arc<Processor>,
    delivery: DeliveryHandle,
) {
    let delivery = Arc::new(delivery);
    let mut state = RetryState::new(policy.max_attempts());
    loop {
        let attempt = state.attempt() + 1;
        match processor(Arc::clone(&delivery), attempt).await {
            Ok(()) => {
                debug!(message_id = %delivery.id(), attempt, "processed");
                delivery.accept();
                return;
            }
            Err(err) => {
                if state.record_failure() {
                    warn!(
                        message_id = %delivery.id(),
                        attempt,
                        max_attempts = policy.max_attempts(),
                        error = %err,
                        "processing failed, will retry"
                    );
                    sleeper.sleep(policy.backoff()).await;
                } else {
                    warn!(
                        message_id = %delivery.id(),
                        attempts = state.attempt(),
                        error = %err,
                        "processing failed, rejecting"
                    );
                    delivery.reject();
                    return;
                }
            }
        }
    }
}
