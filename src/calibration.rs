//! Sensor calibration — usable light range from observed extremes.
//!
//! Protocol: three soft beeps, then the sensor is sampled every 10 ms for
//! the calibration window while the user covers and uncovers it, then one
//! confirmation beep. The profile is applied the moment sampling ends; the
//! confirmation beep follows.
//!
//! Bounds are the sample extremes widened by 10% of their span on each side
//! (clamped to the ADC range), with the span forced up to at least
//! `MIN_SPAN`. An empty sample set (zero-length window) yields the fallback
//! range with `calibrated = false`.

use crate::arbiter::ActuatorArbiter;
use crate::cue::{CuePlayer, CALIBRATION_DONE, CALIBRATION_START};
use crate::hardware::LightSensor;
use crate::types::{CALIBRATION_SAMPLE_MS, SENSOR_MAX};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Narrowest range a calibrated profile may have.
pub const MIN_SPAN: u16 = 1000;
const MARGIN: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub floor: u16,
    pub ceiling: u16,
    pub calibrated: bool,
}

impl CalibrationProfile {
    pub fn uncalibrated(floor: u16, ceiling: u16) -> Self {
        Self {
            floor,
            ceiling,
            calibrated: false,
        }
    }

    pub fn span(&self) -> u16 {
        self.ceiling.saturating_sub(self.floor)
    }

    /// Derive a profile from raw samples. `fallback` is returned
    /// (uncalibrated) when there are no samples.
    pub fn from_samples(samples: &[u16], fallback: (u16, u16)) -> Self {
        let (Some(&lo), Some(&hi)) = (samples.iter().min(), samples.iter().max()) else {
            return Self::uncalibrated(fallback.0, fallback.1);
        };

        let margin = (hi - lo) as f32 * MARGIN;
        let mut floor = (lo as f32 - margin).floor().max(0.0) as u32;
        let mut ceiling = (hi as f32 + margin).ceil().min(SENSOR_MAX as f32) as u32;

        if ceiling - floor < MIN_SPAN as u32 {
            if floor + MIN_SPAN as u32 <= SENSOR_MAX as u32 {
                ceiling = floor + MIN_SPAN as u32;
            } else {
                ceiling = SENSOR_MAX as u32;
                floor = ceiling - MIN_SPAN as u32;
            }
        }

        Self {
            floor: floor as u16,
            ceiling: ceiling as u16,
            calibrated: true,
        }
    }
}

enum Phase {
    Idle,
    Cue(CuePlayer),
    Sampling {
        until: u64,
        next_at: u64,
        samples: Vec<u16>,
    },
    Confirm(CuePlayer),
}

/// Cooperative calibration task.
pub struct CalibrationEngine {
    phase: Phase,
    duration_ms: u64,
    fallback: (u16, u16),
}

impl CalibrationEngine {
    pub fn new(fallback: (u16, u16)) -> Self {
        Self {
            phase: Phase::Idle,
            duration_ms: 0,
            fallback,
        }
    }

    /// Begin a calibration run. Returns false if one is already running.
    pub fn start(&mut self, duration_ms: u64, now_ms: u64) -> bool {
        if self.is_running() {
            return false;
        }
        info!("=== CALIBRATION START ({} ms) ===", duration_ms);
        info!("Cover the sensor completely, then expose it to light");
        let mut cue = CuePlayer::new();
        cue.enqueue(&CALIBRATION_START, now_ms);
        self.duration_ms = duration_ms;
        self.phase = Phase::Cue(cue);
        true
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    pub fn next_wake(&self) -> Option<u64> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Cue(cue) | Phase::Confirm(cue) => cue.next_wake(),
            Phase::Sampling { next_at, .. } => Some(*next_at),
        }
    }

    /// Advance the task. Returns the new profile on the step where
    /// sampling completes.
    pub fn step(
        &mut self,
        now_ms: u64,
        sensor: &mut dyn LightSensor,
        arbiter: &mut ActuatorArbiter,
    ) -> Option<CalibrationProfile> {
        loop {
            match &mut self.phase {
                Phase::Idle => return None,
                Phase::Cue(cue) => {
                    cue.step(now_ms, arbiter);
                    if cue.is_active() {
                        return None;
                    }
                    debug!("calibration sampling from {} ms", now_ms);
                    self.phase = Phase::Sampling {
                        until: now_ms + self.duration_ms,
                        next_at: now_ms,
                        samples: Vec::with_capacity(
                            (self.duration_ms / CALIBRATION_SAMPLE_MS) as usize + 1,
                        ),
                    };
                }
                Phase::Sampling {
                    until,
                    next_at,
                    samples,
                } => {
                    if now_ms < *next_at {
                        return None;
                    }
                    if now_ms < *until {
                        samples.push(sensor.read_raw());
                        *next_at = now_ms + CALIBRATION_SAMPLE_MS;
                        return None;
                    }
                    let profile = CalibrationProfile::from_samples(samples, self.fallback);
                    if profile.calibrated {
                        info!("Calibration complete!");
                        info!("Floor (dark): {}", profile.floor);
                        info!("Ceiling (bright): {}", profile.ceiling);
                        info!("Range: {} ({} samples)", profile.span(), samples.len());
                    } else {
                        info!("Calibration window was empty, keeping fallback range");
                    }
                    let mut cue = CuePlayer::new();
                    cue.enqueue(&CALIBRATION_DONE, now_ms);
                    cue.step(now_ms, arbiter);
                    self.phase = Phase::Confirm(cue);
                    return Some(profile);
                }
                Phase::Confirm(cue) => {
                    cue.step(now_ms, arbiter);
                    if !cue.is_active() {
                        self.phase = Phase::Idle;
                    }
                    return None;
                }
            }
        }
    }
}
