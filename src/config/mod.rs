mod settings;

use config::{Config, Environment, File};

use crate::utils::Result;

pub use settings::{
    BrokerSettings, DeliverySettings, PartialBrokerSettings, PartialDeliverySettings,
    PartialSettings, Settings,
};


/// Loads configuration from the default file and the environment.
///
/// Sources, later ones winning: `config/default.*` (optional), then
/// environment variables with `__` between section and key
/// (`BROKER__TOPIC_NAME`, `DELIVERY__MAX_IN_FLIGHT`, ...).
/// `BROKER__SUBSCRIPTION_NAMES` takes a comma-separated list. A `.env` file
/// in the working directory is folded into the environment first.
pub fn load_config() -> Result<Settings> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::default()
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("broker.subscription_names"),
        );

    let partial: PartialSettings = builder.build()?.try_deserialize()?;
    Settings::from_partial(partial)
}
