//! Light → pitch mapping.
//!
//! Normalization uses the calibrated profile when one exists, otherwise the
//! configured fallback range. The pitch curve is `n ^ (2 - sensitivity)`
//! scaled onto the 12-step scale, where `sensitivity = range / 100`.
//! Ranges above 200 give a negative exponent, which pushes every non-zero
//! reading to the top of the scale. That curve is kept as-is.

use crate::calibration::CalibrationProfile;
use crate::config::MAX_SENSOR_RANGE;
use crate::error::{NodeError, Result};
use crate::hardware::LightSensor;
use crate::types::{SensorSample, MAX_PITCH_INDEX, NOTES};

pub struct LightToPitchMapper {
    profile: CalibrationProfile,
    fallback: (u16, u16),
    sensor_range: u16,
}

impl LightToPitchMapper {
    pub fn new(fallback_floor: u16, fallback_ceiling: u16, sensor_range: u16) -> Self {
        Self {
            profile: CalibrationProfile::uncalibrated(fallback_floor, fallback_ceiling),
            fallback: (fallback_floor, fallback_ceiling),
            sensor_range: sensor_range.min(MAX_SENSOR_RANGE),
        }
    }

    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    pub fn set_profile(&mut self, profile: CalibrationProfile) {
        self.profile = profile;
    }

    pub fn sensor_range(&self) -> u16 {
        self.sensor_range
    }

    /// Set the configured sensitivity range (0–1000).
    pub fn set_sensor_range(&mut self, range: i64) -> Result<()> {
        if !(0..=MAX_SENSOR_RANGE as i64).contains(&range) {
            return Err(NodeError::RangeOutOfBounds(range));
        }
        self.sensor_range = range as u16;
        Ok(())
    }

    /// Default sensitivity derived from the configured range.
    pub fn sensitivity(&self) -> f32 {
        self.sensor_range as f32 / 100.0
    }

    /// Map a raw reading into [0, 1].
    pub fn normalize(&self, raw: u16) -> f32 {
        let (floor, ceiling) = if self.profile.calibrated {
            (self.profile.floor, self.profile.ceiling)
        } else {
            self.fallback
        };
        let span = (ceiling as f32 - floor as f32).max(1.0);
        ((raw as f32 - floor as f32) / span).clamp(0.0, 1.0)
    }

    /// Read the sensor once and normalize.
    pub fn read(&self, sensor: &mut dyn LightSensor) -> SensorSample {
        let raw = sensor.read_raw();
        SensorSample {
            raw,
            normalized: self.normalize(raw),
        }
    }

    /// Pitch index for a normalized level using the configured sensitivity.
    pub fn pitch_index(&self, normalized: f32) -> usize {
        to_pitch_index(normalized, self.sensitivity())
    }

    /// Scale frequency for a normalized level.
    pub fn frequency(&self, normalized: f32) -> u32 {
        NOTES[self.pitch_index(normalized)]
    }
}

/// `floor((n ^ (2 - s)) * 11)` clamped to [0, 11].
///
/// `n <= 0` maps to 0 for every sensitivity, so a negative exponent never
/// turns darkness into infinity.
pub fn to_pitch_index(normalized: f32, sensitivity: f32) -> usize {
    let n = normalized.clamp(0.0, 1.0);
    if n <= 0.0 {
        return 0;
    }
    let adjusted = n.powf(2.0 - sensitivity);
    if adjusted.is_nan() {
        return 0;
    }
    let index = (adjusted * MAX_PITCH_INDEX as f32).floor();
    index.clamp(0.0, MAX_PITCH_INDEX as f32) as usize
}
