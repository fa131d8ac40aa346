//! Configuration loading and env substitution.
//!
//! Config files: `switchboard.toml`, `switchboard.yaml`, or `switchboard.json`
//! Searched in `./` then `~/.config/switchboard/`.
//!
//! Supports `${ENV_VAR}` substitution in the raw config text and env-var
//! overrides for the bind address and port.

pub mod env;
pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env_overrides, discover_and_load, load_config},
    schema::{LogsConfig, ModelEntry, ServerConfig, SwitchboardConfig, TimeoutsConfig},
};
