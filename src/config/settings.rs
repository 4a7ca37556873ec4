use serde::Deserialize;

use crate::client::SessionOptions;

/// Top-level configuration settings for the application.
///
/// Includes settings for the broker connection and for logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub client: ClientSettings,
    pub log: LogSettings,
}

/// Configuration settings for the MQTT client.
///
/// Defines which broker to dial and how the session presents itself.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    pub url: String,
    pub client_id: String,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub queue_capacity: usize,
}

/// Configuration settings for logging.
#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub client: Option<PartialClientSettings>,
    pub log: Option<PartialLogSettings>,
}

/// Partial client settings.
#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub url: Option<String>,
    pub client_id: Option<String>,
    pub keep_alive_secs: Option<u16>,
    pub clean_session: Option<bool>,
    pub queue_capacity: Option<usize>,
}

/// Partial logging settings.
#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// A client identifier unique enough for one broker, kept within the
/// 23 bytes every MQTT 3.1.1 server must accept.
pub fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("popmqtt-{}", &id[..12])
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        let options = SessionOptions::default();
        Self {
            client: ClientSettings {
                url: "tcp://127.0.0.1:1883".to_string(),
                client_id: generate_client_id(),
                keep_alive_secs: options.keep_alive_secs,
                clean_session: options.clean_session,
                queue_capacity: options.queue_capacity,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl From<&ClientSettings> for SessionOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            keep_alive_secs: settings.keep_alive_secs,
            clean_session: settings.clean_session,
            queue_capacity: settings.queue_capacity,
        }
    }
}
