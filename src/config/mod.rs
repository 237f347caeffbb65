//! The `config` module loads settings from `config/default.toml` (optional)
//! and `LOGCAST_`-prefixed environment variables, then fills the gaps from
//! `Settings::default()`.

mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerBackend, BrokerSettings, ExchangeDriver, ExchangeSettings, LoggingSettings,
    PartialSettings, ServerSettings, Settings, StorageBackend, StorageSettings,
};

pub const ENV_PREFIX: &str = "LOGCAST";

/// Load settings, e.g. `LOGCAST_BROKER_BACKEND=distributed` overrides
/// `[broker] backend` from the file.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("_")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge(Settings::default()))
}
