//! Node configuration — JSON file plus built-in defaults.
//!
//! Every field has a default, so a partial file is valid. CLI flags are
//! applied on top in `main.rs`.

use crate::types::{Mode, NOISE_THRESHOLD, NOTE_DUTY, RECORD_LIMIT_MS};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// Upper bound of the externally settable sensitivity range.
pub const MAX_SENSOR_RANGE: u16 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Reported by `/health`
    pub device_id: String,
    pub initial_mode: Mode,
    /// Sensitivity range, 0–1000 (sensitivity = range / 100)
    pub sensor_range: u16,
    /// Calibration sampling window
    pub calibration_ms: u64,
    pub calibrate_on_boot: bool,
    /// Normalization bounds used until a calibration completes
    pub fallback_floor: u16,
    pub fallback_ceiling: u16,
    pub noise_threshold: f32,
    pub record_limit_ms: u64,
    pub tone_duty: f32,
    pub http_addr: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_id: "light-node".to_string(),
            initial_mode: Mode::LivePlay,
            sensor_range: 100,
            calibration_ms: 3000,
            calibrate_on_boot: true,
            fallback_floor: 1000,
            fallback_ceiling: 50000,
            noise_threshold: NOISE_THRESHOLD,
            record_limit_ms: RECORD_LIMIT_MS,
            tone_duty: NOTE_DUTY,
            http_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file. Returns None if file is absent or malformed.
    pub fn load(path: &Path) -> Option<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) => {
                warn!("Config file {:?} not read: {}", path, e);
                return None;
            }
        };
        match serde_json::from_str::<NodeConfig>(&data) {
            Ok(c) => {
                info!("Loaded config from {:?}", path);
                Some(c.sanitized())
            }
            Err(e) => {
                warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)?;
        info!("Config saved to {:?}", path);
        Ok(())
    }

    /// Clamp values a hand-edited file could get wrong.
    pub fn sanitized(mut self) -> Self {
        if self.sensor_range > MAX_SENSOR_RANGE {
            warn!(
                "sensor_range {} above {}, clamping",
                self.sensor_range, MAX_SENSOR_RANGE
            );
            self.sensor_range = MAX_SENSOR_RANGE;
        }
        if self.fallback_ceiling <= self.fallback_floor {
            warn!("fallback range is empty, using defaults");
            let d = NodeConfig::default();
            self.fallback_floor = d.fallback_floor;
            self.fallback_ceiling = d.fallback_ceiling;
        }
        self.noise_threshold = self.noise_threshold.clamp(0.0, 1.0);
        self.tone_duty = self.tone_duty.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let cfg: NodeConfig = serde_json::from_str(r#"{"sensor_range": 250}"#).unwrap();
        assert_eq!(cfg.sensor_range, 250);
        assert_eq!(cfg.calibration_ms, 3000);
        assert_eq!(cfg.initial_mode, Mode::LivePlay);
    }

    #[test]
    fn test_mode_uses_wire_name() {
        let cfg: NodeConfig =
            serde_json::from_str(r#"{"initial_mode": "Record & Play"}"#).unwrap();
        assert_eq!(cfg.initial_mode, Mode::RecordAndPlay);
    }

    #[test]
    fn test_sanitize_clamps_range_and_fallback() {
        let cfg = NodeConfig {
            sensor_range: 5000,
            fallback_floor: 9000,
            fallback_ceiling: 100,
            ..NodeConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.sensor_range, MAX_SENSOR_RANGE);
        assert_eq!(cfg.fallback_floor, 1000);
        assert_eq!(cfg.fallback_ceiling, 50000);
    }

    #[test]
    fn test_config_roundtrip_file() {
        let dir = std::env::temp_dir().join(format!("lo-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("node.json");
        let cfg = NodeConfig {
            device_id: "pico-7".into(),
            ..NodeConfig::default()
        };
        cfg.save(&path).unwrap();
        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.device_id, "pico-7");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_is_none() {
        assert!(NodeConfig::load(Path::new("/nonexistent/node.json")).is_none());
    }

    #[test]
    fn test_unreadable_path_is_none() {
        // a directory exists but cannot be read as a file
        let dir = std::env::temp_dir();
        assert!(NodeConfig::load(&dir).is_none());
    }
}
