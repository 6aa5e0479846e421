//! Recording engine — delta-encoded capture of the light melody.
//!
//! Runs inside the sensing tick while the node is recording. A note event
//! is appended only when the mapped frequency moves by more than
//! `PITCH_DELTA_HZ` from the last recorded one; dropping below the noise
//! threshold appends a single silence event. Each new note is echoed on
//! the actuator at Live priority so the player hears what is captured.

use crate::arbiter::ActuatorArbiter;
use crate::mapping::LightToPitchMapper;
use crate::types::{
    MelodyEvent, SensorSample, ToneHandle, ToneRequest, NOISE_THRESHOLD, NOTE_DUTY,
    PITCH_DELTA_HZ, RECORD_LIMIT_MS,
};
use log::{debug, trace};
use serde::Serialize;

/// Events exposed by the melody query.
pub const MELODY_QUERY_LIMIT: usize = 100;

/// Captured performance, oldest event first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RecordedMelody {
    events: Vec<MelodyEvent>,
}

impl RecordedMelody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[MelodyEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Timestamp of the last event (0 when empty).
    pub fn duration_ms(&self) -> u64 {
        self.events.last().map_or(0, |e| e.timestamp_ms)
    }

    /// The most recent `limit` events, in chronological order.
    pub fn recent(&self, limit: usize) -> &[MelodyEvent] {
        let start = self.events.len().saturating_sub(limit);
        &self.events[start..]
    }

    fn clear(&mut self) {
        self.events.clear();
    }

    fn push(&mut self, event: MelodyEvent) {
        debug_assert!(
            self.events
                .last()
                .map_or(true, |e| e.timestamp_ms <= event.timestamp_ms),
            "melody timestamps must not go backwards"
        );
        self.events.push(event);
    }
}

impl From<Vec<MelodyEvent>> for RecordedMelody {
    /// Events are put in timestamp order (stable for equal timestamps).
    fn from(mut events: Vec<MelodyEvent>) -> Self {
        events.sort_by_key(|e| e.timestamp_ms);
        Self { events }
    }
}

pub struct RecordingEngine {
    melody: RecordedMelody,
    started_at: u64,
    last_freq: u32,
    echo: Option<ToneHandle>,
    limit_ms: u64,
    noise_threshold: f32,
    duty: f32,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self {
            melody: RecordedMelody::new(),
            started_at: 0,
            last_freq: 0,
            echo: None,
            limit_ms: RECORD_LIMIT_MS,
            noise_threshold: NOISE_THRESHOLD,
            duty: NOTE_DUTY,
        }
    }

    pub fn with_limits(mut self, limit_ms: u64, noise_threshold: f32, duty: f32) -> Self {
        self.limit_ms = limit_ms;
        self.noise_threshold = noise_threshold;
        self.duty = duty;
        self
    }

    pub fn melody(&self) -> &RecordedMelody {
        &self.melody
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    /// Discard the previous take and start the elapsed clock at `now_ms`.
    pub fn begin(&mut self, now_ms: u64) {
        self.melody.clear();
        self.started_at = now_ms;
        self.last_freq = 0;
        self.echo = None;
    }

    /// True once elapsed time has passed the recording limit.
    pub fn limit_reached(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.started_at) > self.limit_ms
    }

    /// Process one sensor sample while recording. Nothing is captured
    /// past the limit.
    pub fn tick(
        &mut self,
        now_ms: u64,
        sample: SensorSample,
        mapper: &LightToPitchMapper,
        arbiter: &mut ActuatorArbiter,
    ) {
        if self.limit_reached(now_ms) {
            return;
        }
        let elapsed = now_ms.saturating_sub(self.started_at);

        if sample.normalized > self.noise_threshold {
            let freq = mapper.frequency(sample.normalized);
            if freq.abs_diff(self.last_freq) > PITCH_DELTA_HZ {
                trace!("rec t={} {} Hz ({})", elapsed, freq, sample);
                self.melody.push(MelodyEvent {
                    timestamp_ms: elapsed,
                    frequency_hz: freq,
                    duty: self.duty,
                });
                self.echo = arbiter.request(ToneRequest::live(freq, self.duty), now_ms);
                self.last_freq = freq;
            }
        } else {
            if self.last_freq > 0 {
                trace!("rec t={} silence", elapsed);
                self.melody.push(MelodyEvent::silence(elapsed));
            }
            self.silence_echo(arbiter);
            self.last_freq = 0;
        }
    }

    /// Close the take. Returns the number of captured events.
    pub fn finish(&mut self, arbiter: &mut ActuatorArbiter) -> usize {
        self.silence_echo(arbiter);
        self.last_freq = 0;
        debug!(
            "recording closed: {} events over {} ms",
            self.melody.len(),
            self.melody.duration_ms()
        );
        self.melody.len()
    }

    fn silence_echo(&mut self, arbiter: &mut ActuatorArbiter) {
        if let Some(h) = self.echo.take() {
            arbiter.cancel(h);
        }
    }
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}
