//! Config schema types (server, timeouts, logs, models).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use switchboard_protocol::{
    CONNECTION_TIMEOUT_SECS, HEARTBEAT_INTERVAL_SECS, REQUEST_TIMEOUT_SECS, openai::ModelCard,
};

/// Top-level config. Every section is optional in the file; missing sections
/// take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub server: ServerConfig,
    pub timeouts: TimeoutsConfig,
    pub logs: LogsConfig,
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

/// Liveness and forwarding timeouts, in whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub heartbeat_interval_secs: u64,
    pub connection_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
            connection_timeout_secs: CONNECTION_TIMEOUT_SECS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    }
}

impl TimeoutsConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Debug-log sink settings. The sink captures `client_log` frames and
/// per-request captures into individual files under `debug_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub enabled: bool,
    pub debug_dir: std::path::PathBuf,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug_dir: "debug_logs".into(),
        }
    }
}

/// One entry of the static `/v1/models` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub created: i64,
    #[serde(default = "default_owner")]
    pub owned_by: String,
}

fn default_owner() -> String {
    "openai".into()
}

impl ModelEntry {
    pub fn to_card(&self) -> ModelCard {
        ModelCard {
            id: self.id.clone(),
            object: "model".into(),
            created: self.created,
            owned_by: self.owned_by.clone(),
        }
    }
}

impl SwitchboardConfig {
    /// Model descriptors to advertise; falls back to the built-in pair when
    /// the config lists none.
    pub fn model_cards(&self) -> Vec<ModelCard> {
        if self.models.is_empty() {
            return vec![
                ModelCard {
                    id: "gpt-3.5-turbo".into(),
                    object: "model".into(),
                    created: 1_677_615_200,
                    owned_by: "openai".into(),
                },
                ModelCard {
                    id: "gpt-4".into(),
                    object: "model".into(),
                    created: 1_667_615_200,
                    owned_by: "openai".into(),
                },
            ];
        }
        self.models.iter().map(ModelEntry::to_card).collect()
    }
}
