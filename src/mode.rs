//! Mode / recording state machine.
//!
//! ```text
//!   LivePlay ──set_mode(R&P)──▶ RecordAndPlay{Idle}
//!      ▲                          │  begin_recording        ▲ end_recording
//!      │                          ▼                          │
//!      └──set_mode(Live)── RecordAndPlay{Recording} ─────────┘
//!                     (forces end_recording first)
//!
//!   Idle ──begin_playback──▶ Playing ──end_playback──▶ Idle   (either mode)
//! ```
//!
//! Only guards and transitions live here; the side effects (clearing the
//! melody, cues, actuator) belong to the node, which calls these first and
//! acts only on success.

use crate::error::Rejection;
use crate::types::{Mode, RecordingState};
use log::info;

#[derive(Debug, Clone)]
pub struct ModeController {
    mode: Mode,
    state: RecordingState,
}

impl ModeController {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            state: RecordingState::Idle,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    pub fn is_playing(&self) -> bool {
        self.state == RecordingState::Playing
    }

    /// Switch mode. Returns true if an in-progress recording was force-stopped.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        let forced_stop = mode == Mode::LivePlay && self.is_recording();
        if forced_stop {
            self.state = RecordingState::Idle;
        }
        if self.mode != mode {
            info!("Mode: {} → {}", self.mode, mode);
        }
        self.mode = mode;
        forced_stop
    }

    /// Idle → Recording, only in Record & Play.
    pub fn begin_recording(&mut self) -> Result<(), Rejection> {
        if self.state != RecordingState::Idle {
            return Err(Rejection::Busy);
        }
        if self.mode != Mode::RecordAndPlay {
            return Err(Rejection::WrongMode);
        }
        self.state = RecordingState::Recording;
        Ok(())
    }

    /// Recording → Idle.
    pub fn end_recording(&mut self) -> Result<(), Rejection> {
        if !self.is_recording() {
            return Err(Rejection::NotRecording);
        }
        self.state = RecordingState::Idle;
        Ok(())
    }

    /// Idle → Playing, in either mode.
    pub fn begin_playback(&mut self) -> Result<(), Rejection> {
        if self.state != RecordingState::Idle {
            return Err(Rejection::Busy);
        }
        self.state = RecordingState::Playing;
        Ok(())
    }

    /// Playing → Idle. No-op from any other state.
    pub fn end_playback(&mut self) {
        if self.is_playing() {
            self.state = RecordingState::Idle;
        }
    }
}
