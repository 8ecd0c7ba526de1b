use anyhow::{anyhow, bail, Context, Result};
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::LineTerminator;

pub const ENV_ENDPOINT: &str = "BEACONLINK_ENDPOINT";
pub const ENV_TERMINATOR: &str = "BEACONLINK_TERMINATOR";
pub const ENV_SENDER: &str = "BEACONLINK_SENDER";

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bridge address handed to the transport, e.g. `192.168.4.1:23`
    pub endpoint: Option<String>,
    pub line_terminator: LineTerminator,
    pub sender_id: Option<String>,
    pub sos_hold_ms: u64,
    pub sos_cooldown_ms: u64,
    pub location_max_age_secs: u64,
    pub location_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub event_backlog: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_location: Option<Coordinates>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            line_terminator: LineTerminator::CrLf,
            sender_id: None,
            sos_hold_ms: 5000,
            sos_cooldown_ms: 3000,
            location_max_age_secs: 300,
            location_timeout_secs: 30,
            connect_timeout_secs: 10,
            event_backlog: 256,
            fixed_location: None,
        }
    }
}

impl Config {
    pub fn sos_hold(&self) -> Duration {
        Duration::from_millis(self.sos_hold_ms)
    }

    pub fn sos_cooldown(&self) -> Duration {
        Duration::from_millis(self.sos_cooldown_ms)
    }

    pub fn location_max_age(&self) -> Duration {
        Duration::from_secs(self.location_max_age_secs)
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.location_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sos_hold_ms == 0 || self.sos_cooldown_ms == 0 {
            bail!("SOS hold and cool-down durations must be non-zero");
        }
        if self.location_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            bail!("timeouts must be non-zero");
        }
        if self.event_backlog == 0 {
            bail!("event backlog must hold at least one event");
        }
        if let Some(c) = &self.fixed_location {
            if !c.latitude.is_finite() || !(-90.0..=90.0).contains(&c.latitude) {
                bail!("fixed latitude {} is out of range", c.latitude);
            }
            if !c.longitude.is_finite() || !(-180.0..=180.0).contains(&c.longitude) {
                bail!("fixed longitude {} is out of range", c.longitude);
            }
        }
        Ok(())
    }

    /// Apply `BEACONLINK_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = env::var(ENV_ENDPOINT) {
            self.endpoint = Some(endpoint);
        }
        if let Ok(terminator) = env::var(ENV_TERMINATOR) {
            self.line_terminator = terminator.parse().map_err(|e: String| anyhow!(e))?;
        }
        if let Ok(sender) = env::var(ENV_SENDER) {
            self.sender_id = Some(sender);
        }
        Ok(())
    }

    /// Read a config file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let config: Config = serde_json::from_reader(file)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Load from the default (or overridden) location, then apply the environment
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&config_path()?)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }
}

/// Use `path` instead of the per-user config file. Only the first call takes effect.
pub fn set_config_path_override(path: PathBuf) -> bool {
    CONFIG_PATH_OVERRIDE.set(path).is_ok()
}

pub fn config_dir() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("beaconlink");
    Ok(dir)
}

pub fn config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(config_dir()?.join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sos_hold(), Duration::from_millis(5000));
        assert_eq!(config.sos_cooldown(), Duration::from_millis(3000));
        assert_eq!(config.location_max_age(), Duration::from_secs(300));
        assert_eq!(config.line_terminator, LineTerminator::CrLf);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            endpoint: Some("10.0.0.2:23".to_string()),
            line_terminator: LineTerminator::Lf,
            sender_id: Some("unit-7".to_string()),
            fixed_location: Some(Coordinates { latitude: 45.0, longitude: 7.5 }),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_and_partial_file() {
        let dir = tempdir().unwrap();
        assert_eq!(Config::load_from(&dir.path().join("none.json")).unwrap(), Config::default());

        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "line_terminator": "cr", "sos_hold_ms": 2500 }"#).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.line_terminator, LineTerminator::Cr);
        assert_eq!(config.sos_hold_ms, 2500);
        assert_eq!(config.sos_cooldown_ms, 3000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "sos_hold_ms": 0 }"#).unwrap();
        assert!(Config::load_from(&path).is_err());

        let config = Config {
            fixed_location: Some(Coordinates { latitude: 91.0, longitude: 0.0 }),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        fs::write(&path, r#"{ "line_terminator": "nl" }"#).unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
