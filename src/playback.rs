//! Playback engine — replays a recorded melody with its original timing.
//!
//! After the start cue, event `i` sounds at `origin + events[i].timestamp_ms`,
//! where `origin` is the moment the cue finished. Deadlines are absolute, so
//! late wake-ups do not accumulate drift. Each event is a held Playback
//! request (frequency 0 holds a rest). The actuator is silenced right after
//! the last event and playback ends.
//!
//! There is no cancel: once started, playback runs to the end.

use crate::arbiter::ActuatorArbiter;
use crate::cue::{CuePlayer, PLAYBACK_START};
use crate::recording::RecordedMelody;
use crate::types::ToneRequest;
use log::{debug, info, trace};

enum Phase {
    Idle,
    Cue(CuePlayer),
    Events { origin: u64, cursor: usize },
}

pub struct PlaybackEngine {
    phase: Phase,
}

impl PlaybackEngine {
    pub fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    /// Begin with the start cue. The caller has already checked the
    /// state machine and that the melody is non-empty.
    pub fn start(&mut self, melody: &RecordedMelody, now_ms: u64) {
        info!(
            "Playing back {} events ({} ms)...",
            melody.len(),
            melody.duration_ms()
        );
        let mut cue = CuePlayer::new();
        cue.enqueue(&PLAYBACK_START, now_ms);
        self.phase = Phase::Cue(cue);
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    /// Timeline origin (end of the start cue), once events have begun.
    pub fn origin(&self) -> Option<u64> {
        match self.phase {
            Phase::Events { origin, .. } => Some(origin),
            _ => None,
        }
    }

    pub fn next_wake(&self, melody: &RecordedMelody) -> Option<u64> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Cue(cue) => cue.next_wake(),
            Phase::Events { origin, cursor } => Some(
                melody
                    .events()
                    .get(*cursor)
                    .map_or(*origin, |e| origin + e.timestamp_ms),
            ),
        }
    }

    /// Advance playback. Returns true on the step where it finishes.
    pub fn step(
        &mut self,
        now_ms: u64,
        melody: &RecordedMelody,
        arbiter: &mut ActuatorArbiter,
    ) -> bool {
        if let Phase::Cue(cue) = &mut self.phase {
            cue.step(now_ms, arbiter);
            if cue.is_active() {
                return false;
            }
            debug!("playback timeline starts at {} ms", now_ms);
            self.phase = Phase::Events {
                origin: now_ms,
                cursor: 0,
            };
        }

        let Phase::Events { origin, cursor } = &mut self.phase else {
            return false;
        };

        let events = melody.events();
        while let Some(event) = events.get(*cursor) {
            if *origin + event.timestamp_ms > now_ms {
                return false;
            }
            if event.is_silence() {
                trace!("play t={} rest", event.timestamp_ms);
            } else {
                trace!("play t={} {} Hz", event.timestamp_ms, event.frequency_hz);
            }
            arbiter.request(ToneRequest::playback(event.frequency_hz, event.duty), now_ms);
            *cursor += 1;
        }

        arbiter.stop();
        self.phase = Phase::Idle;
        info!("Playback complete");
        true
    }
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new()
    }
}
