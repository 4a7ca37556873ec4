mod settings;

use crate::config::settings::PartialSettings;
use crate::utils::error::Result;
use config::{Config, Environment, File};

pub use settings::{ClientSettings, LogSettings, Settings, generate_client_id};

/// Prefix of environment variables that override file settings,
/// e.g. `POPMQTT__CLIENT__URL`.
pub const ENV_PREFIX: &str = "POPMQTT";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing the client and log configurations,
/// or [`Error::Config`](crate::Error::Config) when a source cannot be read or parsed
pub fn load_config() -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();
    let client = partial.client;
    let log = partial.log;

    Ok(Settings {
        client: ClientSettings {
            url: client
                .as_ref()
                .and_then(|c| c.url.clone())
                .unwrap_or(default.client.url),
            client_id: client
                .as_ref()
                .and_then(|c| c.client_id.clone())
                .unwrap_or(default.client.client_id),
            keep_alive_secs: client
                .as_ref()
                .and_then(|c| c.keep_alive_secs)
                .unwrap_or(default.client.keep_alive_secs),
            clean_session: client
                .as_ref()
                .and_then(|c| c.clean_session)
                .unwrap_or(default.client.clean_session),
            queue_capacity: client
                .as_ref()
                .and_then(|c| c.queue_capacity)
                .unwrap_or(default.client.queue_capacity),
        },
        log: LogSettings {
            level: log
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.log.level),
        },
    })
}
