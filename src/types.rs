use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

// ─── Scale ──────────────────────────────────────────────────────────────────

/// Twelve-step scale driven by the light level, C4 upward (Hz).
pub const NOTES: [u32; 12] = [262, 294, 330, 349, 392, 440, 494, 523, 587, 659, 698, 784];

/// Highest valid pitch index into `NOTES`.
pub const MAX_PITCH_INDEX: usize = NOTES.len() - 1;

/// Native ADC range of the light sensor (16-bit reads).
pub const SENSOR_MAX: u16 = u16::MAX;

// ─── Timing ─────────────────────────────────────────────────────────────────

/// Sensing tick while active (40 Hz).
pub const SENSING_PERIOD_MS: u64 = 25;
/// Sensing back-off while another producer owns the actuator.
pub const SENSING_BACKOFF_MS: u64 = 50;
/// Button poll period.
pub const BUTTON_PERIOD_MS: u64 = 50;
/// Calibration sampling period.
pub const CALIBRATION_SAMPLE_MS: u64 = 10;
/// Recordings stop automatically once elapsed time exceeds this.
pub const RECORD_LIMIT_MS: u64 = 30_000;

/// Normalized light at or below this is treated as darkness.
pub const NOISE_THRESHOLD: f32 = 0.05;
/// Recorded pitch changes smaller than or equal to this collapse into one event.
pub const PITCH_DELTA_HZ: u32 = 10;
/// Duty used for live and recorded notes (32768 / 65535 on the PWM).
pub const NOTE_DUTY: f32 = 0.5;

// ─── Mode ───────────────────────────────────────────────────────────────────

/// Top-level operating mode of the node.
/// Serializes with the canonical wire names ("Live Play", "Record & Play").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "Live Play")]
    LivePlay,
    #[serde(rename = "Record & Play")]
    RecordAndPlay,
}

impl Mode {
    /// Parse one of the accepted mode tokens: `l`, `L`, `Live Play`,
    /// `r`, `R`, `Record & Play`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "l" | "L" | "Live Play" => Some(Mode::LivePlay),
            "r" | "R" | "Record & Play" => Some(Mode::RecordAndPlay),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::LivePlay => "Live Play",
            Mode::RecordAndPlay => "Record & Play",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Record & Play sub-state. Never both recording and playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
    Playing,
}

// ─── Sensor ─────────────────────────────────────────────────────────────────

/// One light reading: raw ADC value plus its normalized level in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub raw: u16,
    pub normalized: f32,
}

impl fmt::Display for SensorSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "raw={:>5}  norm={:.3}", self.raw, self.normalized)
    }
}

// ─── Melody ─────────────────────────────────────────────────────────────────

/// One recorded pitch change.
///
/// Wire names follow the device API: `time`, `freq`, `duty`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MelodyEvent {
    /// Milliseconds since recording start (non-decreasing within a melody)
    #[serde(rename = "time")]
    pub timestamp_ms: u64,
    /// 0 = silence
    #[serde(rename = "freq")]
    pub frequency_hz: u32,
    /// Fraction of the PWM cycle the buzzer is driven, 0.0–1.0
    pub duty: f32,
}

impl MelodyEvent {
    pub fn note(timestamp_ms: u64, frequency_hz: u32) -> Self {
        Self {
            timestamp_ms,
            frequency_hz,
            duty: NOTE_DUTY,
        }
    }

    pub fn silence(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            frequency_hz: 0,
            duty: 0.0,
        }
    }

    pub fn is_silence(&self) -> bool {
        self.frequency_hz == 0
    }
}

// ─── Tone requests ──────────────────────────────────────────────────────────

/// Who is asking for the actuator. Ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Continuous live-sensing path (also the recording echo)
    Live,
    /// Melody playback notes
    Playback,
    /// Indication beeps (calibration, recording start/stop, playback start)
    Cue,
    /// Transient tone requested over the network
    Api,
}

/// A request to drive the tone actuator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneRequest {
    /// 0 = hold the actuator silent
    pub frequency_hz: u32,
    pub duty: f32,
    /// None = indefinite (held until superseded or canceled)
    pub duration_ms: Option<u64>,
    pub priority: Priority,
}

impl ToneRequest {
    /// Indefinite live-priority tone.
    pub fn live(frequency_hz: u32, duty: f32) -> Self {
        Self {
            frequency_hz,
            duty,
            duration_ms: None,
            priority: Priority::Live,
        }
    }

    /// Playback note, held until the next event or playback end.
    pub fn playback(frequency_hz: u32, duty: f32) -> Self {
        Self {
            frequency_hz,
            duty,
            duration_ms: None,
            priority: Priority::Playback,
        }
    }

    pub fn cue(frequency_hz: u32, duty: f32, duration_ms: u64) -> Self {
        Self {
            frequency_hz,
            duty,
            duration_ms: Some(duration_ms),
            priority: Priority::Cue,
        }
    }

    pub fn api(frequency_hz: u32, duty: f32, duration_ms: u64) -> Self {
        Self {
            frequency_hz,
            duty,
            duration_ms: Some(duration_ms),
            priority: Priority::Api,
        }
    }
}

/// Identifies one accepted tone request for later cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToneHandle(pub(crate) u64);

// ─── Buttons ────────────────────────────────────────────────────────────────

/// The two physical push buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    /// Start/stop recording
    A,
    /// Start playback
    B,
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the node's lifetime, in milliseconds.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_tokens() {
        for t in ["l", "L", "Live Play"] {
            assert_eq!(Mode::from_token(t), Some(Mode::LivePlay));
        }
        for t in ["r", "R", "Record & Play"] {
            assert_eq!(Mode::from_token(t), Some(Mode::RecordAndPlay));
        }
        assert_eq!(Mode::from_token("live"), None);
        assert_eq!(Mode::from_token(""), None);
    }

    #[test]
    fn test_mode_serializes_canonical_name() {
        let json = serde_json::to_string(&Mode::RecordAndPlay).unwrap();
        assert_eq!(json, "\"Record & Play\"");
    }

    #[test]
    fn test_melody_event_wire_names() {
        let json = serde_json::to_value(MelodyEvent::note(120, 330)).unwrap();
        assert_eq!(json["time"], 120);
        assert_eq!(json["freq"], 330);
        assert!(json.get("timestamp_ms").is_none());
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Live < Priority::Playback);
        assert!(Priority::Playback < Priority::Cue);
        assert!(Priority::Cue < Priority::Api);
    }
}
