use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env::expand_env, schema::SwitchboardConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "switchboard.toml",
    "switchboard.yaml",
    "switchboard.yml",
    "switchboard.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<SwitchboardConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = expand_env(&raw);
    parse_config(&raw, path)
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<SwitchboardConfig> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml")
        .to_ascii_lowercase();
    let cfg = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(raw)
            .map_err(|e| anyhow::anyhow!("invalid YAML in {}: {e}", path.display()))?,
        "json" => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("invalid JSON in {}: {e}", path.display()))?,
        _ => toml::from_str(raw)
            .map_err(|e| anyhow::anyhow!("invalid TOML in {}: {e}", path.display()))?,
    };
    Ok(cfg)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./switchboard.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/switchboard/switchboard.{toml,yaml,yml,json}` (user-global)
///
/// Returns `SwitchboardConfig::default()` if no config file is found.
pub fn discover_and_load() -> SwitchboardConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return apply_env_overrides(cfg),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    apply_env_overrides(SwitchboardConfig::default())
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.is_file() {
            return Some(p);
        }
    }
    let config_home = dirs_next::config_dir()?.join("switchboard");
    for name in CONFIG_FILENAMES {
        let p = config_home.join(name);
        if p.is_file() {
            return Some(p);
        }
    }
    None
}

/// Apply `SWITCHBOARD_BIND` / `SWITCHBOARD_PORT` env overrides on top of the
/// loaded file.
pub fn apply_env_overrides(mut cfg: SwitchboardConfig) -> SwitchboardConfig {
    if let Ok(bind) = std::env::var("SWITCHBOARD_BIND")
        && !bind.is_empty()
    {
        cfg.server.bind = bind;
    }
    if let Ok(port) = std::env::var("SWITCHBOARD_PORT") {
        match port.parse() {
            Ok(p) => cfg.server.port = p,
            Err(_) => warn!(value = %port, "ignoring non-numeric SWITCHBOARD_PORT"),
        }
    }
    cfg
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.toml");
        std::fs::write(&path, "[server]\nbind = \"127.0.0.1\"\nport = 9000\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(cfg.server.port, 9000);
    }

    #[test]
    fn loads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.yaml");
        std::fs::write(&path, "timeouts:\n  request_timeout_secs: 5\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.timeouts.request_timeout_secs, 5);
        // untouched sections keep defaults
        assert_eq!(cfg.timeouts.heartbeat_interval_secs, 25);
    }

    #[test]
    fn loads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.json");
        std::fs::write(&path, r#"{"logs": {"enabled": false}}"#).unwrap();
        let cfg = load_config(&path).unwrap();
        assert!(!cfg.logs.enabled);
    }

    #[test]
    fn unknown_env_placeholder_survives_as_literal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.toml");
        std::fs::write(
            &path,
            "[server]\nbind = \"${SWITCHBOARD_LOADER_TEST_UNSET}\"\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.bind, "${SWITCHBOARD_LOADER_TEST_UNSET}");
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.toml");
        std::fs::write(&path, "server = not toml").unwrap();
        assert!(load_config(&path).is_err());
    }
}
