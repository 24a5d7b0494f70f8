//! # Persistence Module
//!
//! Typed, versioned configuration for the dispatcher host. Every field carries
//! a default so a partial file (or no file at all) still yields a usable
//! configuration; the whole document is validated once at load time instead
//! of each module parsing its own settings.
//!
//! The on-disk format is TOML:
//!
//! ```toml
//! version = 1
//!
//! [dispatcher]
//! frame_rate_hz = 90
//! max_consecutive_failures = 30
//!
//! [input]
//! trigger_on_value = 0.15
//!
//! [modules.RightFarGrabEntity]
//! priority = 520
//! ```

pub mod config_store;

use crate::dispatcher::ModuleParameters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported configuration version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root of the configuration file
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    pub version: u32,
    pub dispatcher: DispatcherSettings,
    pub input: InputSettings,
    /// Per-module overrides keyed by registered module name
    pub modules: BTreeMap<String, ModuleOverride>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            dispatcher: DispatcherSettings::default(),
            input: InputSettings::default(),
            modules: BTreeMap::new(),
        }
    }
}

/// Frame loop settings
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DispatcherSettings {
    pub frame_rate_hz: u32,
    /// Consecutive failing frames after which the host disables a module.
    /// Zero keeps failing modules enabled forever.
    pub max_consecutive_failures: u32,
    /// Stop after this many frames, zero runs until shutdown
    pub max_frames: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            frame_rate_hz: 90,
            max_consecutive_failures: 30,
            max_frames: 0,
        }
    }
}

impl DispatcherSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate_hz.max(1)))
    }
}

/// Thresholds and ranges used when building controller snapshots and by the
/// grab modules
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct InputSettings {
    pub trigger_on_value: f32,
    pub trigger_off_value: f32,
    pub trigger_click_value: f32,
    pub bumper_on_value: f32,
    /// Radius around each hand in which entities are reported as nearby
    pub nearby_search_radius: f32,
    pub far_grab_max_distance: f32,
    pub ray_picks_enabled: bool,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            trigger_on_value: 0.15,
            trigger_off_value: 0.1,
            trigger_click_value: 0.95,
            bumper_on_value: 0.5,
            nearby_search_radius: 1.0,
            far_grab_max_distance: 1000.0,
            ray_picks_enabled: true,
        }
    }
}

/// Overrides applied to a module's declared parameters at registration
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ModuleOverride {
    pub enabled: bool,
    pub priority: Option<i32>,
    pub depth: Option<i32>,
    pub probe_interval_ms: Option<u64>,
}

impl Default for ModuleOverride {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            depth: None,
            probe_interval_ms: None,
        }
    }
}

impl ModuleOverride {
    pub fn apply(&self, mut parameters: ModuleParameters) -> ModuleParameters {
        if let Some(priority) = self.priority {
            parameters.priority = priority;
        }
        if let Some(depth) = self.depth {
            parameters.depth = depth;
        }
        if let Some(ms) = self.probe_interval_ms {
            parameters.probe_interval = Duration::from_millis(ms);
        }
        parameters
    }
}

impl DispatcherConfig {
    /// Parses and validates a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DispatcherConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn module_override(&self, name: &str) -> Option<&ModuleOverride> {
        self.modules.get(name)
    }

    pub fn is_module_enabled(&self, name: &str) -> bool {
        self.module_override(name).map_or(true, |o| o.enabled)
    }

    /// Applies a configured override, if any, to `parameters`
    pub fn parameters_for(&self, name: &str, parameters: ModuleParameters) -> ModuleParameters {
        match self.module_override(name) {
            Some(module_override) => module_override.apply(parameters),
            None => parameters,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
                expected: CONFIG_VERSION,
            });
        }

        let dispatcher = &self.dispatcher;
        if dispatcher.frame_rate_hz == 0 || dispatcher.frame_rate_hz > 1000 {
            return Err(ConfigError::Invalid(format!(
                "frame_rate_hz must be within 1..=1000, got {}",
                dispatcher.frame_rate_hz
            )));
        }

        let input = &self.input;
        let unit = 0.0..=1.0;
        for (name, value) in [
            ("trigger_on_value", input.trigger_on_value),
            ("trigger_off_value", input.trigger_off_value),
            ("trigger_click_value", input.trigger_click_value),
            ("bumper_on_value", input.bumper_on_value),
        ] {
            if !unit.contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within 0.0..=1.0, got {}",
                    name, value
                )));
            }
        }
        if input.trigger_off_value >= input.trigger_on_value {
            return Err(ConfigError::Invalid(format!(
                "trigger_off_value ({}) must be below trigger_on_value ({})",
                input.trigger_off_value, input.trigger_on_value
            )));
        }
        if input.trigger_click_value < input.trigger_on_value {
            return Err(ConfigError::Invalid(format!(
                "trigger_click_value ({}) must not be below trigger_on_value ({})",
                input.trigger_click_value, input.trigger_on_value
            )));
        }
        if input.nearby_search_radius <= 0.0 || input.far_grab_max_distance <= 0.0 {
            return Err(ConfigError::Invalid(
                "search radius and far grab distance must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DispatcherConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_document_falls_back_to_defaults() {
        let config = DispatcherConfig::from_toml_str(
            r#"
            version = 1

            [input]
            trigger_on_value = 0.3

            [modules.LeftFarGrabEntity]
            priority = 520
            "#,
        )
        .expect("valid config");

        assert_eq!(config.input.trigger_on_value, 0.3);
        assert_eq!(config.input.trigger_off_value, 0.1);
        assert_eq!(config.dispatcher.frame_rate_hz, 90);
        let module = config.module_override("LeftFarGrabEntity").expect("override");
        assert!(module.enabled);
        assert_eq!(module.priority, Some(520));
    }

    #[test]
    fn inverted_trigger_thresholds_are_rejected() {
        let result = DispatcherConfig::from_toml_str(
            r#"
            [input]
            trigger_on_value = 0.05
            trigger_off_value = 0.1
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let result = DispatcherConfig::from_toml_str("version = 7");
        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedVersion { found: 7, expected: 1 })
        ));
    }

    #[test]
    fn override_only_touches_set_fields() {
        let parameters = ModuleParameters::new(500, ["leftHand"]).with_depth(3);
        let module_override = ModuleOverride {
            priority: Some(42),
            probe_interval_ms: Some(100),
            ..Default::default()
        };

        let applied = module_override.apply(parameters);
        assert_eq!(applied.priority, 42);
        assert_eq!(applied.depth, 3);
        assert_eq!(applied.probe_interval, Duration::from_millis(100));
    }

    #[test]
    fn serialized_default_parses_back() {
        let config = DispatcherConfig::default();
        let text = config.to_toml_string().expect("serialize");
        assert_eq!(DispatcherConfig::from_toml_str(&text).expect("parse"), config);
    }
}
