//! The node: one owned state object plus a cooperative scheduler.
//!
//! Every task is a method on [`Node`] with an explicit next-wake deadline in
//! milliseconds of node time. Nothing runs in parallel with anything else:
//! [`Node::advance_to`] (virtual time) and [`Node::run`] (wall clock) pick
//! the earliest due task, run it to its yield point, and repeat. Dispatcher
//! commands are handled between task steps.
//!
//! Ties at the same deadline run in the order calibration, cues, playback,
//! tone-expiry, buttons, sensing.

use crate::arbiter::ActuatorArbiter;
use crate::buttons::ButtonMonitor;
use crate::calibration::{CalibrationEngine, CalibrationProfile};
use crate::config::NodeConfig;
use crate::cue::{CuePlayer, RECORDING_START, RECORDING_STOP};
use crate::dispatcher::NodeRequest;
use crate::error::{Rejection, Result};
use crate::hardware::{ButtonInputs, LightSensor, ToneOutput};
use crate::live::LivePath;
use crate::mapping::LightToPitchMapper;
use crate::mode::ModeController;
use crate::playback::PlaybackEngine;
use crate::recording::{RecordedMelody, RecordingEngine};
use crate::types::*;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, trace, warn};
use std::thread;
use std::time::Duration;

/// The node's hardware, behind the seam traits.
pub struct NodeHardware {
    pub sensor: Box<dyn LightSensor>,
    pub output: Box<dyn ToneOutput>,
    pub buttons: Box<dyn ButtonInputs>,
}

/// Named scheduler tasks, declared in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Task {
    Calibration,
    Cues,
    Playback,
    ToneExpiry,
    Buttons,
    Sensing,
}

pub struct Node {
    config: NodeConfig,
    mode: ModeController,
    mapper: LightToPitchMapper,
    calibration: CalibrationEngine,
    recording: RecordingEngine,
    playback: PlaybackEngine,
    live: LivePath,
    cues: CuePlayer,
    button_monitor: ButtonMonitor,
    arbiter: ActuatorArbiter,
    /// In-flight tone requested over the network
    api_tone: Option<ToneHandle>,
    sensor: Box<dyn LightSensor>,
    buttons: Box<dyn ButtonInputs>,
    next_sensing: u64,
    next_buttons: u64,
}

impl Node {
    /// Build the node at time `now_ms`. Boot calibration, if configured,
    /// starts immediately.
    pub fn new(config: NodeConfig, hw: NodeHardware, now_ms: u64) -> Self {
        let config = config.sanitized();
        let fallback = (config.fallback_floor, config.fallback_ceiling);
        let mut node = Self {
            mode: ModeController::new(config.initial_mode),
            mapper: LightToPitchMapper::new(fallback.0, fallback.1, config.sensor_range),
            calibration: CalibrationEngine::new(fallback),
            recording: RecordingEngine::new().with_limits(
                config.record_limit_ms,
                config.noise_threshold,
                config.tone_duty,
            ),
            playback: PlaybackEngine::new(),
            live: LivePath::new(),
            cues: CuePlayer::new(),
            button_monitor: ButtonMonitor::new(),
            arbiter: ActuatorArbiter::new(hw.output),
            api_tone: None,
            sensor: hw.sensor,
            buttons: hw.buttons,
            next_sensing: now_ms,
            next_buttons: now_ms,
            config,
        };
        info!(
            "Node {:?} up in {} (range {})",
            node.config.device_id,
            node.mode.mode(),
            node.mapper.sensor_range()
        );
        if node.config.calibrate_on_boot {
            node.calibrate(now_ms);
        }
        node
    }

    // ─── Scheduler ──────────────────────────────────────────────────────

    /// The earliest due task and its deadline.
    pub fn next_task(&self) -> (u64, Task) {
        let candidates = [
            (self.calibration.next_wake(), Task::Calibration),
            (self.cues.next_wake(), Task::Cues),
            (self.playback.next_wake(self.recording.melody()), Task::Playback),
            (self.arbiter.next_expiry(), Task::ToneExpiry),
            (Some(self.next_buttons), Task::Buttons),
            (Some(self.next_sensing), Task::Sensing),
        ];
        candidates
            .into_iter()
            .filter_map(|(at, task)| at.map(|at| (at, task)))
            .min()
            .unwrap_or((self.next_sensing, Task::Sensing))
    }

    pub fn next_deadline(&self) -> u64 {
        self.next_task().0
    }

    /// Run every task due at or before `now_ms`, each observing `now_ms`.
    pub fn run_due(&mut self, now_ms: u64) {
        loop {
            let (at, task) = self.next_task();
            if at > now_ms {
                break;
            }
            self.run_task(task, now_ms);
        }
    }

    /// Advance virtual time to `t_ms`, running each task at its own deadline.
    pub fn advance_to(&mut self, t_ms: u64) {
        loop {
            let (at, task) = self.next_task();
            if at > t_ms {
                break;
            }
            self.run_task(task, at);
        }
    }

    fn run_task(&mut self, task: Task, now_ms: u64) {
        trace!("{:?} @ {}", task, now_ms);
        match task {
            Task::Calibration => self.calibration_task(now_ms),
            Task::Cues => self.cues.step(now_ms, &mut self.arbiter),
            Task::Playback => self.playback_task(now_ms),
            Task::ToneExpiry => self.arbiter.expire(now_ms),
            Task::Buttons => self.buttons_task(now_ms),
            Task::Sensing => self.sensing_task(now_ms),
        }
    }

    /// Drive the scheduler against the wall clock, handling requests from
    /// `commands` between task steps. Never returns.
    pub fn run(&mut self, commands: Receiver<NodeRequest>, clock: &SessionClock) -> ! {
        info!("Control loop running");
        let mut commands = Some(commands);
        loop {
            self.run_due(clock.now_ms());

            let wait = Duration::from_millis(self.next_deadline().saturating_sub(clock.now_ms()));
            let Some(rx) = &commands else {
                thread::sleep(wait);
                continue;
            };
            match rx.recv_timeout(wait) {
                Ok(req) if req.expired() => {
                    warn!("dropping stale request {:?}", req.command);
                }
                Ok(req) => {
                    let reply = self.handle(req.command, clock.now_ms());
                    if req.reply.send(reply).is_err() {
                        debug!("requester gone before reply");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("command channel closed, running on buttons only");
                    commands = None;
                }
            }
        }
    }

    // ─── Tasks ──────────────────────────────────────────────────────────

    fn calibration_task(&mut self, now_ms: u64) {
        if let Some(profile) =
            self.calibration
                .step(now_ms, self.sensor.as_mut(), &mut self.arbiter)
        {
            self.mapper.set_profile(profile);
        }
    }

    fn playback_task(&mut self, now_ms: u64) {
        if self
            .playback
            .step(now_ms, self.recording.melody(), &mut self.arbiter)
        {
            self.mode.end_playback();
        }
    }

    fn buttons_task(&mut self, now_ms: u64) {
        self.next_buttons = now_ms + BUTTON_PERIOD_MS;
        for button in self.button_monitor.poll(self.buttons.as_mut()) {
            match button {
                Button::A => {
                    let result = if self.mode.is_recording() {
                        self.stop_recording(now_ms).map(|_| ())
                    } else {
                        self.start_recording(now_ms)
                    };
                    if let Err(r) = result {
                        debug!("button A ignored: {}", r);
                    }
                }
                Button::B => {
                    if self.mode.state() == RecordingState::Idle {
                        if let Err(r) = self.start_playback(now_ms) {
                            debug!("button B ignored: {}", r);
                        }
                    }
                }
            }
        }
    }

    /// True while sensing must leave the actuator alone.
    fn sensing_suppressed(&self, now_ms: u64) -> bool {
        self.arbiter.is_busy(now_ms)
            || self.playback.is_active()
            || self.calibration.is_running()
            || self.cues.is_active()
    }

    fn sensing_task(&mut self, now_ms: u64) {
        // The limit holds even while sensing is suppressed.
        if self.mode.is_recording() && self.recording.limit_reached(now_ms) {
            info!("Recording limit reached, stopping");
            if let Err(r) = self.stop_recording(now_ms) {
                warn!("auto-stop failed: {}", r);
            }
        }
        if self.sensing_suppressed(now_ms) {
            self.next_sensing = now_ms + SENSING_BACKOFF_MS;
            return;
        }
        self.next_sensing = now_ms + SENSING_PERIOD_MS;

        let sample = self.mapper.read(self.sensor.as_mut());
        if self.mode.is_recording() {
            self.recording
                .tick(now_ms, sample, &self.mapper, &mut self.arbiter);
        } else if self.mode.mode() == Mode::LivePlay {
            self.live.tick(
                now_ms,
                sample,
                &self.mapper,
                &mut self.arbiter,
                self.config.noise_threshold,
                self.config.tone_duty,
            );
        }
    }

    // ─── Operations ─────────────────────────────────────────────────────

    /// Switch mode. Leaving for Live Play force-stops a recording.
    pub fn set_mode(&mut self, mode: Mode, now_ms: u64) {
        if self.mode.set_mode(mode) {
            let events = self.recording.finish(&mut self.arbiter);
            self.cues.enqueue(&RECORDING_STOP, now_ms);
            info!("Recording stopped by mode change. {} events captured.", events);
        }
        self.live.silence(&mut self.arbiter);
    }

    /// Set the sensitivity range (0–1000).
    pub fn set_range(&mut self, range: i64) -> Result<u16> {
        self.mapper.set_sensor_range(range)?;
        info!("Sensor range set to {}", range);
        Ok(self.mapper.sensor_range())
    }

    /// Transient API tone. Frequency 0 cancels the in-flight one.
    /// Refused while recording so the echo never competes with it.
    pub fn play_tone(
        &mut self,
        frequency_hz: u32,
        duration_ms: u64,
        duty: f32,
        now_ms: u64,
    ) -> std::result::Result<(), Rejection> {
        if self.mode.is_recording() {
            return Err(Rejection::Busy);
        }
        if let Some(h) = self.api_tone.take() {
            self.arbiter.cancel(h);
        }
        if frequency_hz == 0 {
            debug!("API tone canceled");
            return Ok(());
        }
        debug!("API tone {} Hz for {} ms", frequency_hz, duration_ms);
        self.api_tone = self
            .arbiter
            .request(ToneRequest::api(frequency_hz, duty, duration_ms), now_ms);
        Ok(())
    }

    /// Start a calibration run. Returns false if one is already running.
    pub fn calibrate(&mut self, now_ms: u64) -> bool {
        self.live.silence(&mut self.arbiter);
        self.calibration.start(self.config.calibration_ms, now_ms)
    }

    pub fn start_recording(&mut self, now_ms: u64) -> std::result::Result<(), Rejection> {
        self.mode.begin_recording()?;
        self.live.silence(&mut self.arbiter);
        self.recording.begin(now_ms);
        self.cues.enqueue(&RECORDING_START, now_ms);
        info!("Recording started...");
        Ok(())
    }

    /// Returns the number of captured events.
    pub fn stop_recording(&mut self, now_ms: u64) -> std::result::Result<usize, Rejection> {
        self.mode.end_recording()?;
        let events = self.recording.finish(&mut self.arbiter);
        self.cues.enqueue(&RECORDING_STOP, now_ms);
        info!("Recording stopped. {} events captured.", events);
        Ok(events)
    }

    pub fn start_playback(&mut self, now_ms: u64) -> std::result::Result<(), Rejection> {
        if self.mode.state() != RecordingState::Idle {
            return Err(Rejection::Busy);
        }
        if self.recording.melody().is_empty() {
            info!("No recording to play");
            return Err(Rejection::NothingToPlay);
        }
        self.mode.begin_playback()?;
        self.live.silence(&mut self.arbiter);
        self.playback.start(self.recording.melody(), now_ms);
        Ok(())
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode.mode()
    }

    pub fn state(&self) -> RecordingState {
        self.mode.state()
    }

    pub fn profile(&self) -> &CalibrationProfile {
        self.mapper.profile()
    }

    pub fn sensor_range(&self) -> u16 {
        self.mapper.sensor_range()
    }

    pub fn melody(&self) -> &RecordedMelody {
        self.recording.melody()
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_running()
    }

    /// One fresh sensor reading.
    pub fn read_sensor(&mut self) -> SensorSample {
        self.mapper.read(self.sensor.as_mut())
    }

    /// The request holding the actuator, if any.
    pub fn active_tone(&self) -> Option<ToneRequest> {
        self.arbiter.active_request()
    }
}
