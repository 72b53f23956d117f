//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, RewindConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/rewind/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("rewind/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("rewind.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
///
/// The table is also checked against the config schema so that a bad value
/// is reported against the file it came from, not the merged result.
pub fn load_from_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let table = parse_table(&contents, path)?;
    table_to_config(table.clone(), path)?;
    Ok(table)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Deserialize a (possibly partial) table; missing keys take their defaults.
pub fn table_to_config(table: toml::Table, path: &Path) -> Result<RewindConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge two raw tables, with `overlay` taking precedence.
///
/// Nested tables merge key by key, so a later file only needs to name the
/// values it changes.
pub fn merge_tables(mut base: toml::Table, overlay: toml::Table) -> toml::Table {
    for (key, value) in overlay {
        match (base.remove(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                base.insert(key, toml::Value::Table(merge_tables(existing, incoming)));
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
    base
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut RewindConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, env::vars());
}

/// Apply `REWIND_*` overrides from an arbitrary set of variables.
///
/// Values that fail to parse are ignored and not recorded as overrides.
pub fn apply_overrides_from<I>(config: &mut RewindConfig, sources: &mut ConfigSources, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut rust_log = None;

    for (key, value) in vars {
        let applied = match key.as_str() {
            "REWIND_TICK_INTERVAL_MS" => set_parsed(&mut config.playback.tick_interval_ms, &value),
            "REWIND_MAX_WINDOW_SECS" => set_parsed(&mut config.playback.max_window_secs, &value),
            "REWIND_LIVE_DELAY_MULTIPLIER" => {
                set_parsed(&mut config.playback.live_delay_multiplier, &value)
            }
            "REWIND_CATCH_UP_MULTIPLIER" => {
                set_parsed(&mut config.playback.catch_up_multiplier, &value)
            }
            "REWIND_ENCODING" => {
                config.capture.encoding = value;
                true
            }
            "REWIND_QUEUE_DEPTH" => set_parsed(&mut config.capture.queue_depth, &value),
            "REWIND_MAX_CHUNKS" => match value.parse() {
                Ok(n) => {
                    config.capture.max_chunks = Some(n);
                    true
                }
                Err(_) => false,
            },
            "REWIND_LOG_LEVEL" => {
                config.telemetry.log_level = value;
                true
            }
            "RUST_LOG" => {
                rust_log = Some(value);
                false
            }
            _ => false,
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }

    // RUST_LOG wins over REWIND_LOG_LEVEL regardless of iteration order
    if let Some(v) = rust_log {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) -> bool {
    match value.trim().parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}
