//! Configuration of the demo input method.
//!
//! Extends the engine's `libime_core::Config` (flattened, so engine keys sit
//! at the top level of the TOML file) with the options of the demo itself.
//!
//! # Example
//!
//! ```rust
//! use libime_demo::DemoConfig;
//!
//! let config = DemoConfig::from_toml_str("uppercase = false").unwrap();
//! assert!(!config.uppercase);
//! assert!(config.core.force_keyboard_open);
//! ```
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Demo options plus the engine's.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Engine options.
    #[serde(flatten)]
    pub core: libime_core::Config,

    /// Show typed letters in upper case while composing.
    pub uppercase: bool,

    /// Whether the input method starts in composing mode or passes keys through.
    pub start_enabled: bool,

    /// Label of the language-bar button in each mode.
    pub label_on: String,
    pub label_off: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            core: libime_core::Config::default(),
            uppercase: true,
            start_enabled: true,
            label_on: "A".to_string(),
            label_off: "a".to_string(),
        }
    }
}

impl DemoConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn label(&self, enabled: bool) -> &str {
        if enabled {
            &self.label_on
        } else {
            &self.label_off
        }
    }
}
