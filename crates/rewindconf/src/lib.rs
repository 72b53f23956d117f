//! Minimal configuration loading for rewind.
//!
//! Every value here is a tunable of the DVR core: how often chunks are
//! produced and consumed, how much content the renderer may hold, how far
//! behind production "live" sits, and which encoding capture accepts.
//! Nothing is persisted; the chunk store is rebuilt every run.
//!
//! # Usage
//!
//! ```rust,no_run
//! use rewindconf::RewindConfig;
//!
//! let config = RewindConfig::load().expect("Failed to load config");
//! println!("tick: {} ms", config.playback.tick_interval_ms);
//! println!("window: {} s", config.playback.max_window_secs);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/rewind/config.toml` (system)
//! 2. `~/.config/rewind/config.toml` (user)
//! 3. `./rewind.toml` (local override, replaced by `--config`)
//! 4. Environment variables (`REWIND_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [playback]
//! tick_interval_ms = 2000
//! max_window_secs = 180.0
//! live_delay_multiplier = 2
//! catch_up_multiplier = 10
//!
//! [capture]
//! encoding = 'video/webm; codecs="vp8, opus"'
//! queue_depth = 8
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod tunables;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use tunables::{CaptureTunables, PlaybackTunables, TelemetryConfig, DEFAULT_ENCODING};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete rewind configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RewindConfig {
    #[serde(default)]
    pub playback: PlaybackTunables,

    #[serde(default)]
    pub capture: CaptureTunables,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl RewindConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./rewind.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    ///
    /// The merged result is validated before it is returned.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_from_file(&path)?;
            merged = loader::merge_tables(merged, table);
            sources.files.push(path);
        }

        let mut config = loader::table_to_config(merged, std::path::Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject values the DVR core cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let playback = &self.playback;
        if playback.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "playback.tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        if playback.live_delay_multiplier == 0 || playback.catch_up_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "playback multipliers must be greater than zero".to_string(),
            ));
        }
        let segment_secs = playback.tick_interval_ms as f64 / 1000.0;
        if !playback.max_window_secs.is_finite() || playback.max_window_secs < 2.0 * segment_secs {
            return Err(ConfigError::Invalid(format!(
                "playback.max_window_secs ({}) must hold at least two {}s segments",
                playback.max_window_secs, segment_secs
            )));
        }
        if self.capture.encoding.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "capture.encoding must not be empty".to_string(),
            ));
        }
        if self.capture.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "capture.queue_depth must be greater than zero".to_string(),
            ));
        }
        if self.capture.max_chunks == Some(0) {
            return Err(ConfigError::Invalid(
                "capture.max_chunks must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# rewind configuration\n\n");

        output.push_str("[playback]\n");
        output.push_str(&format!(
            "tick_interval_ms = {}\n",
            self.playback.tick_interval_ms
        ));
        output.push_str(&format!(
            "max_window_secs = {:?}\n",
            self.playback.max_window_secs
        ));
        output.push_str(&format!(
            "live_delay_multiplier = {}\n",
            self.playback.live_delay_multiplier
        ));
        output.push_str(&format!(
            "catch_up_multiplier = {}\n",
            self.playback.catch_up_multiplier
        ));

        output.push_str("\n[capture]\n");
        output.push_str(&format!("encoding = '{}'\n", self.capture.encoding));
        output.push_str(&format!("queue_depth = {}\n", self.capture.queue_depth));
        if let Some(max_chunks) = self.capture.max_chunks {
            output.push_str(&format!("max_chunks = {}\n", max_chunks));
        }

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.telemetry.log_level
        ));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RewindConfig::default();
        assert_eq!(config.playback.tick_interval_ms, 2000);
        assert_eq!(config.playback.max_window_secs, 180.0);
        assert_eq!(config.playback.live_delay_multiplier, 2);
        assert_eq!(config.playback.catch_up_multiplier, 10);
        assert_eq!(config.capture.encoding, DEFAULT_ENCODING);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_toml_roundtrips_through_parser() {
        let mut config = RewindConfig::default();
        config.capture.max_chunks = Some(90);

        let toml = config.to_toml();
        assert!(toml.contains("[playback]"));
        assert!(toml.contains("[capture]"));
        assert!(toml.contains("max_chunks = 90"));

        let parsed: RewindConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[playback]\nmax_window_secs = 60.0").unwrap();

        let (config, sources) = RewindConfig::load_with_sources_from(Some(file.path())).unwrap();
        assert_eq!(config.playback.max_window_secs, 60.0);
        assert!(sources.files.iter().any(|p| p == file.path()));
    }

    #[test]
    fn test_load_rejects_invalid_window() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[playback]\ntick_interval_ms = 2000\nmax_window_secs = 3.0"
        )
        .unwrap();

        let err = RewindConfig::load_from(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = RewindConfig::default();
        config.playback.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = RewindConfig::default();
        config.playback.catch_up_multiplier = 0;
        assert!(config.validate().is_err());

        let mut config = RewindConfig::default();
        config.capture.max_chunks = Some(0);
        assert!(config.validate().is_err());
    }
}
