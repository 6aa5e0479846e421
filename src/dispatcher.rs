//! Command dispatcher — the boundary between the network and the node.
//!
//! Requests are parsed into typed [`Command`]s here, against one strict
//! schema per route (unknown fields rejected), so nothing malformed reaches
//! node state. The HTTP thread hands commands to the control loop over a
//! channel and waits a bounded time for the [`Reply`].

use crate::error::{NodeError, Rejection, Result};
use crate::node::Node;
use crate::recording::MELODY_QUERY_LIMIT;
use crate::types::{Mode, MelodyEvent, RecordingState};
use crossbeam_channel::{bounded, Sender};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How long the HTTP side waits for the control loop.
pub const REPLY_TIMEOUT_MS: u64 = 500;

/// Highest accepted tone frequency.
pub const MAX_TONE_HZ: u32 = 20_000;
/// Longest accepted tone.
pub const MAX_TONE_MS: u64 = 60_000;

// ─── Request schemas ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModeBody {
    mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeBody {
    range: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToneBody {
    freq: Option<i64>,
    ms: Option<i64>,
    duty: Option<f64>,
}

// ─── Commands ───────────────────────────────────────────────────────────────

/// A validated operation on the node.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Health,
    Sensor,
    GetMode,
    SetMode(Mode),
    GetRange,
    /// Already checked to be within 0–1000
    SetRange(u16),
    /// `frequency_hz` 0 cancels the in-flight API tone
    Tone {
        frequency_hz: u32,
        duration_ms: u64,
        duty: f32,
    },
    Calibrate,
    StartRecording,
    StopRecording,
    Play,
    Melody,
    /// Everything the status page shows
    Snapshot,
}

/// Parse and validate one request.
pub fn parse_request(method: &str, path: &str, body: &str) -> Result<Command> {
    let path = path.split('?').next().unwrap_or(path);
    let get = method == "GET";
    let post = method == "POST";

    let command = match path {
        "/" if get => Command::Snapshot,
        "/health" if get => Command::Health,
        "/sensor" if get => Command::Sensor,
        "/get_mode" if get => Command::GetMode,
        "/get_range" if get => Command::GetRange,
        "/melody" if get => Command::Melody,
        "/post_mode" if post => {
            let req: ModeBody = serde_json::from_str(body)?;
            let mode = Mode::from_token(&req.mode).ok_or(NodeError::InvalidMode(req.mode))?;
            Command::SetMode(mode)
        }
        "/post_range" if post => {
            let req: RangeBody = serde_json::from_str(body)?;
            Command::SetRange(validate_range(req.range)?)
        }
        "/tone" if post => parse_tone(body)?,
        "/calibrate" if post => Command::Calibrate,
        "/record/start" if post => Command::StartRecording,
        "/record/stop" if post => Command::StopRecording,
        "/record/play" if post => Command::Play,
        "/" | "/health" | "/sensor" | "/get_mode" | "/get_range" | "/melody" | "/post_mode"
        | "/post_range" | "/tone" | "/calibrate" | "/record/start" | "/record/stop"
        | "/record/play" => return Err(NodeError::MethodNotAllowed),
        _ => return Err(NodeError::NotFound),
    };
    debug!("{} {} → {:?}", method, path, command);
    Ok(command)
}

fn validate_range(range: i64) -> Result<u16> {
    if !(0..=crate::config::MAX_SENSOR_RANGE as i64).contains(&range) {
        return Err(NodeError::RangeOutOfBounds(range));
    }
    Ok(range as u16)
}

fn parse_tone(body: &str) -> Result<Command> {
    let req: ToneBody = serde_json::from_str(body)?;
    let freq = req.freq.unwrap_or(440);
    let ms = req.ms.unwrap_or(100);
    let duty = req.duty.unwrap_or(0.5);

    if !(0..=MAX_TONE_HZ as i64).contains(&freq) {
        return Err(NodeError::InvalidTone(format!(
            "freq {} outside 0-{}",
            freq, MAX_TONE_HZ
        )));
    }
    if freq > 0 && !(1..=MAX_TONE_MS as i64).contains(&ms) {
        return Err(NodeError::InvalidTone(format!(
            "ms {} outside 1-{}",
            ms, MAX_TONE_MS
        )));
    }
    if !(0.0..=1.0).contains(&duty) {
        return Err(NodeError::InvalidTone(format!("duty {} outside 0-1", duty)));
    }
    Ok(Command::Tone {
        frequency_hz: freq as u32,
        duration_ms: ms.max(0) as u64,
        duty: duty as f32,
    })
}

// ─── Replies ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReply {
    pub status: &'static str,
    pub device_id: String,
    pub api: &'static str,
    pub calibrated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReply {
    pub raw: u16,
    /// Rounded to 3 decimal places
    pub norm: f64,
    pub floor: u16,
    pub ceiling: u16,
    pub calibrated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeReply {
    pub mode: Mode,
    pub is_recording: bool,
    pub is_playing: bool,
    pub melody_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeSetReply {
    pub status: &'static str,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeReply {
    pub floor: u16,
    pub ceiling: u16,
    /// Width of the calibrated window
    pub range: u16,
    pub sensor_range: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeSetReply {
    pub status: &'static str,
    pub range: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReply {
    pub status: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopReply {
    pub status: &'static str,
    pub events: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MelodyReply {
    pub melody: Vec<MelodyEvent>,
    pub total_events: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub device_id: String,
    pub mode: Mode,
    pub state: RecordingState,
    pub calibrated: bool,
    pub calibrating: bool,
    pub raw: u16,
    pub norm: f64,
    pub floor: u16,
    pub ceiling: u16,
    pub melody_length: usize,
}

/// Node answer to a [`Command`]; serializes as the bare reply object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Health(HealthReply),
    Sensor(SensorReply),
    Mode(ModeReply),
    ModeSet(ModeSetReply),
    Range(RangeReply),
    RangeSet(RangeSetReply),
    Status(StatusReply),
    Stop(StopReply),
    Melody(MelodyReply),
    Snapshot(Snapshot),
}

fn status(status: &'static str) -> Reply {
    Reply::Status(StatusReply { status })
}

fn round3(v: f32) -> f64 {
    (v as f64 * 1000.0).round() / 1000.0
}

fn outcome(result: std::result::Result<(), Rejection>) -> Reply {
    match result {
        Ok(()) => status("ok"),
        Err(r) => {
            debug!("rejected: {}", r);
            status(r.status())
        }
    }
}

impl Node {
    /// Execute one validated command at `now_ms`.
    pub fn handle(&mut self, command: Command, now_ms: u64) -> Result<Reply> {
        let reply = match command {
            Command::Health => Reply::Health(HealthReply {
                status: "active",
                device_id: self.config().device_id.clone(),
                api: "v2.0",
                calibrated: self.profile().calibrated,
            }),
            Command::Sensor => {
                let sample = self.read_sensor();
                let p = *self.profile();
                Reply::Sensor(SensorReply {
                    raw: sample.raw,
                    norm: round3(sample.normalized),
                    floor: p.floor,
                    ceiling: p.ceiling,
                    calibrated: p.calibrated,
                })
            }
            Command::GetMode => Reply::Mode(ModeReply {
                mode: self.mode(),
                is_recording: self.state() == RecordingState::Recording,
                is_playing: self.state() == RecordingState::Playing,
                melody_length: self.melody().len(),
            }),
            Command::SetMode(mode) => {
                self.set_mode(mode, now_ms);
                Reply::ModeSet(ModeSetReply {
                    status: "ok",
                    mode: self.mode(),
                })
            }
            Command::GetRange => {
                let p = *self.profile();
                Reply::Range(RangeReply {
                    floor: p.floor,
                    ceiling: p.ceiling,
                    range: p.span(),
                    sensor_range: self.sensor_range(),
                })
            }
            Command::SetRange(range) => {
                let range = self.set_range(range as i64)?;
                Reply::RangeSet(RangeSetReply { status: "ok", range })
            }
            Command::Tone {
                frequency_hz,
                duration_ms,
                duty,
            } => outcome(self.play_tone(frequency_hz, duration_ms, duty, now_ms)),
            Command::Calibrate => {
                if !self.calibrate(now_ms) {
                    debug!("calibration already running");
                }
                status("calibrating")
            }
            Command::StartRecording => outcome(self.start_recording(now_ms)),
            Command::StopRecording => match self.stop_recording(now_ms) {
                Ok(events) => Reply::Stop(StopReply {
                    status: "ok",
                    events,
                }),
                Err(r) => Reply::Stop(StopReply {
                    status: r.status(),
                    events: self.melody().len(),
                }),
            },
            Command::Play => outcome(self.start_playback(now_ms)),
            Command::Melody => {
                let melody = self.melody();
                Reply::Melody(MelodyReply {
                    melody: melody.recent(MELODY_QUERY_LIMIT).to_vec(),
                    total_events: melody.len(),
                    duration_ms: melody.duration_ms(),
                })
            }
            Command::Snapshot => {
                let sample = self.read_sensor();
                let p = *self.profile();
                Reply::Snapshot(Snapshot {
                    device_id: self.config().device_id.clone(),
                    mode: self.mode(),
                    state: self.state(),
                    calibrated: p.calibrated,
                    calibrating: self.is_calibrating(),
                    raw: sample.raw,
                    norm: round3(sample.normalized),
                    floor: p.floor,
                    ceiling: p.ceiling,
                    melody_length: self.melody().len(),
                })
            }
        };
        Ok(reply)
    }
}

// ─── Channel plumbing ───────────────────────────────────────────────────────

/// A command in flight to the control loop, with its reply slot.
pub struct NodeRequest {
    pub command: Command,
    pub reply: Sender<Result<Reply>>,
    deadline: Instant,
}

impl NodeRequest {
    /// `timeout` is how long the requester will wait for the reply.
    pub fn new(command: Command, reply: Sender<Result<Reply>>, timeout: Duration) -> Self {
        Self {
            command,
            reply,
            deadline: Instant::now() + timeout,
        }
    }

    /// True once the requester has stopped waiting for the reply.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Cloneable sending side used by the HTTP threads.
#[derive(Clone)]
pub struct NodeHandle {
    tx: Sender<NodeRequest>,
    timeout: Duration,
}

impl NodeHandle {
    pub fn new(tx: Sender<NodeRequest>) -> Self {
        Self {
            tx,
            timeout: Duration::from_millis(REPLY_TIMEOUT_MS),
        }
    }

    /// Send `command` and wait (bounded) for the node's reply.
    pub fn call(&self, command: Command) -> Result<Reply> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(NodeRequest::new(command, reply_tx, self.timeout))
            .map_err(|_| NodeError::NodeUnavailable)?;
        reply_rx.recv_timeout(self.timeout).map_err(|_| {
            warn!("control loop did not answer within {:?}", self.timeout);
            NodeError::NodeUnavailable
        })?
    }
}
