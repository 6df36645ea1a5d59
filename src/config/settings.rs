use std::time::Duration;

use serde::Deserialize;

use crate::subscriber::RetryPolicy;
use crate::utils::{Error, Result};

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub delivery: DeliverySettings,
}

/// Which broker resources to talk to.
///
/// All values are opaque strings handed to the broker client; nothing is
/// validated beyond presence.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub project_id: String,
    pub topic_name: String,
    /// One or more subscriptions to consume from.
    pub subscription_names: Vec<String>,
    pub credentials_path: Option<String>,
}

/// Tunables for the consume side.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DeliverySettings {
    /// Queue capacity and concurrent handler bound per subscriber.
    pub max_in_flight: usize,
    pub retry_max_attempts: u32,
    pub retry_backoff_ms: u64,
}

/// Partial configuration loaded from files or environment.
///
/// Everything is optional here; [`Settings::from_partial`] decides what is
/// defaulted and what is required.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub delivery: Option<PartialDeliverySettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerSettings {
    pub project_id: Option<String>,
    pub topic_name: Option<String>,
    pub subscription_names: Option<Vec<String>>,
    pub credentials_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialDeliverySettings {
    pub max_in_flight: Option<usize>,
    pub retry_max_attempts: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            retry_max_attempts: 3,
            retry_backoff_ms: 1000,
        }
    }
}

impl Settings {
    /// Merges a partial configuration into a full one.
    ///
    /// Delivery tunables fall back to defaults; the broker values cannot be
    /// guessed, so a missing one fails with [`Error::Configuration`] before
    /// anything talks to the broker.
    pub fn from_partial(partial: PartialSettings) -> Result<Self> {
        let broker = partial.broker.unwrap_or_default();
        let delivery = partial.delivery.unwrap_or_default();
        let defaults = DeliverySettings::default();

        Ok(Self {
            broker: BrokerSettings {
                project_id: broker
                    .project_id
                    .ok_or_else(|| Error::missing_config("broker.project_id"))?,
                topic_name: broker
                    .topic_name
                    .ok_or_else(|| Error::missing_config("broker.topic_name"))?,
                subscription_names: broker
                    .subscription_names
                    .filter(|names| !names.is_empty())
                    .ok_or_else(|| Error::missing_config("broker.subscription_names"))?,
                credentials_path: broker.credentials_path,
            },
            delivery: DeliverySettings {
                max_in_flight: delivery.max_in_flight.unwrap_or(defaults.max_in_flight),
                retry_max_attempts: delivery
                    .retry_max_attempts
                    .unwrap_or(defaults.retry_max_attempts),
                retry_backoff_ms: delivery
                    .retry_backoff_ms
                    .unwrap_or(defaults.retry_backoff_ms),
            },
        })
    }

    /// The configured retry tuning as a [`RetryPolicy`].
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.delivery.retry_max_attempts,
            Duration::from_millis(self.delivery.retry_backoff_ms),
        )
    }
}
