//! Audible indication cues.
//!
//! A cue is a short fixed beep pattern. Each beep goes through the arbiter as
//! a transient `Priority::Cue` request lasting `on_ms`; the player then waits
//! out `off_ms` before the next beep. The player stays active through the
//! final gap, so callers that wait for it see the full cue latency.

use crate::arbiter::ActuatorArbiter;
use crate::types::ToneRequest;
use log::trace;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beep {
    pub frequency_hz: u32,
    pub duty: f32,
    pub on_ms: u64,
    pub off_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct Cue {
    pub name: &'static str,
    pub beeps: &'static [Beep],
}

const SOFT: f32 = 10000.0 / 65535.0;
const LOUD: f32 = 20000.0 / 65535.0;

pub const CALIBRATION_START: Cue = Cue {
    name: "calibration start",
    beeps: &[
        Beep { frequency_hz: 1000, duty: SOFT, on_ms: 100, off_ms: 200 },
        Beep { frequency_hz: 1000, duty: SOFT, on_ms: 100, off_ms: 200 },
        Beep { frequency_hz: 1000, duty: SOFT, on_ms: 100, off_ms: 200 },
    ],
};

pub const CALIBRATION_DONE: Cue = Cue {
    name: "calibration done",
    beeps: &[Beep { frequency_hz: 523, duty: LOUD, on_ms: 200, off_ms: 0 }],
};

pub const RECORDING_START: Cue = Cue {
    name: "recording start",
    beeps: &[
        Beep { frequency_hz: 800, duty: LOUD, on_ms: 100, off_ms: 100 },
        Beep { frequency_hz: 800, duty: LOUD, on_ms: 100, off_ms: 100 },
    ],
};

pub const RECORDING_STOP: Cue = Cue {
    name: "recording stop",
    beeps: &[Beep { frequency_hz: 400, duty: LOUD, on_ms: 200, off_ms: 0 }],
};

pub const PLAYBACK_START: Cue = Cue {
    name: "playback start",
    beeps: &[Beep { frequency_hz: 600, duty: LOUD, on_ms: 100, off_ms: 200 }],
};

impl Cue {
    /// Wall-clock length including the trailing gap.
    pub fn duration_ms(&self) -> u64 {
        self.beeps.iter().map(|b| b.on_ms + b.off_ms).sum()
    }
}

/// Plays queued beeps one after another on the arbiter.
#[derive(Debug, Default)]
pub struct CuePlayer {
    queue: VecDeque<Beep>,
    next_at: Option<u64>,
}

impl CuePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cue. Starts immediately if nothing is playing.
    pub fn enqueue(&mut self, cue: &Cue, now_ms: u64) {
        trace!("cue queued: {}", cue.name);
        self.queue.extend(cue.beeps.iter().copied());
        if self.next_at.is_none() {
            self.next_at = Some(now_ms);
        }
    }

    pub fn is_active(&self) -> bool {
        self.next_at.is_some()
    }

    pub fn next_wake(&self) -> Option<u64> {
        self.next_at
    }

    /// Sound the next beep if one is due; go idle once the last gap elapses.
    pub fn step(&mut self, now_ms: u64, arbiter: &mut ActuatorArbiter) {
        match self.next_at {
            Some(at) if at <= now_ms => {}
            _ => return,
        }
        match self.queue.pop_front() {
            Some(beep) => {
                arbiter.request(
                    ToneRequest::cue(beep.frequency_hz, beep.duty, beep.on_ms),
                    now_ms,
                );
                self.next_at = Some(now_ms + beep.on_ms + beep.off_ms);
            }
            None => self.next_at = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::ToneLog;

    fn drive(player: &mut CuePlayer, arbiter: &mut ActuatorArbiter, log: &ToneLog, until: u64) {
        while let Some(at) = player.next_wake() {
            if at > until {
                break;
            }
            log.set_time(at);
            arbiter.expire(at);
            player.step(at, arbiter);
        }
    }

    #[test]
    fn test_cue_durations() {
        assert_eq!(CALIBRATION_START.duration_ms(), 900);
        assert_eq!(RECORDING_START.duration_ms(), 400);
        assert_eq!(PLAYBACK_START.duration_ms(), 300);
    }

    #[test]
    fn test_player_sounds_every_beep_then_goes_idle() {
        let log = ToneLog::new();
        let mut arbiter = ActuatorArbiter::new(Box::new(log.clone()));
        let mut player = CuePlayer::new();
        player.enqueue(&CALIBRATION_START, 0);
        assert!(player.is_active());

        drive(&mut player, &mut arbiter, &log, 2000);
        assert!(!player.is_active());
        assert_eq!(log.activations(), 3);
        let plays: Vec<u64> = log.plays().iter().map(|p| p.at_ms).collect();
        assert_eq!(plays, vec![0, 300, 600]);
    }

    #[test]
    fn test_enqueue_while_active_appends() {
        let log = ToneLog::new();
        let mut arbiter = ActuatorArbiter::new(Box::new(log.clone()));
        let mut player = CuePlayer::new();
        player.enqueue(&RECORDING_STOP, 0);
        player.enqueue(&RECORDING_START, 10);
        drive(&mut player, &mut arbiter, &log, 5000);
        let freqs: Vec<u32> = log.plays().iter().map(|p| p.frequency_hz).collect();
        assert_eq!(freqs, vec![400, 800, 800]);
    }
}
