use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Timing, geometry and response settings of a target detection trial.
///
/// Every field has a default, so a config file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialConfig {
    pub timeout_ms: u64,
    pub background_color: [u8; 3],

    pub refresh_delay_ms: u64,
    pub target_onset_ms: u64,
    pub probe_onset_ms: u64,

    pub gutter_px: f32,
    pub mask_size_px: f32,
    pub mask_grain_px: f32,
    pub text_height_px: f32,
    pub text_color: [u8; 3],
    pub target_radius_px: f32,
    pub target_color: [u8; 3],

    /// Accepted response keys mapped to what they mean.
    pub response_keys: BTreeMap<String, String>,
    pub font_path: Option<PathBuf>,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            background_color: [255, 255, 255],
            refresh_delay_ms: 10,
            target_onset_ms: 500,
            probe_onset_ms: 1000,
            gutter_px: 300.0,
            mask_size_px: 200.0,
            mask_grain_px: 10.0,
            text_height_px: 40.0,
            text_color: [0, 0, 0],
            target_radius_px: 10.0,
            target_color: [255, 255, 255],
            response_keys: [("y", "present"), ("n", "absent")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            font_path: None,
        }
    }
}

impl TrialConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TrialConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("Loaded trial config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_delay_ms == 0 {
            return Err(Error::InvalidConfig("refresh_delay_ms must be > 0".into()));
        }
        if self.target_onset_ms > self.probe_onset_ms {
            return Err(Error::InvalidConfig(format!(
                "target onset ({} ms) must not come after probe onset ({} ms)",
                self.target_onset_ms, self.probe_onset_ms
            )));
        }
        if self.probe_onset_ms >= self.timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "probe onset ({} ms) must come before the timeout ({} ms)",
                self.probe_onset_ms, self.timeout_ms
            )));
        }
        for (name, value) in [
            ("gutter_px", self.gutter_px),
            ("mask_size_px", self.mask_size_px),
            ("mask_grain_px", self.mask_grain_px),
            ("text_height_px", self.text_height_px),
            ("target_radius_px", self.target_radius_px),
        ] {
            if !(value > 0.0) {
                return Err(Error::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        if self.response_keys.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one response key is required".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    pub fn target_onset(&self) -> Duration {
        Duration::from_millis(self.target_onset_ms)
    }

    pub fn probe_onset(&self) -> Duration {
        Duration::from_millis(self.probe_onset_ms)
    }
}
