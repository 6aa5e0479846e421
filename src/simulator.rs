//! Hardware-free backends: scripted light, scriptable buttons, and tone
//! outputs that log or record instead of driving a buzzer.

use crate::hardware::{ButtonInputs, LightSensor, ToneOutput};
use crate::types::{Button, SessionClock};
use log::info;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// ─── Light ──────────────────────────────────────────────────────────────────

/// Light patterns the simulator can play back in place of a hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    /// Slow triangle from dark to bright and back (8 s period)
    Sweep,
    /// Hand waving over the sensor: 3 s sine with a dark dip each cycle
    Wave,
    /// Covered sensor
    Dark,
}

impl Gesture {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sweep" => Some(Gesture::Sweep),
            "wave" | "demo" => Some(Gesture::Wave),
            "dark" => Some(Gesture::Dark),
            _ => None,
        }
    }

    /// Raw reading `t_ms` into the gesture.
    pub fn raw_at(&self, t_ms: u64) -> u16 {
        match self {
            Gesture::Sweep => {
                let phase = (t_ms % 8000) as f32 / 4000.0;
                let level = if phase <= 1.0 { phase } else { 2.0 - phase };
                lerp(2000.0, 60000.0, smoothstep(level)) as u16
            }
            Gesture::Wave => {
                let phase = (t_ms % 3000) as f32 / 3000.0;
                let level = (2.0 * PI * phase).sin();
                // bottom of the swing is clipped to darkness
                if level < -0.7 {
                    800
                } else {
                    (32000.0 + 26000.0 * level) as u16
                }
            }
            Gesture::Dark => 800,
        }
    }
}

/// Shared handle for setting a [`ScriptedSensor`]'s level from outside.
#[derive(Debug, Clone)]
pub struct LightLevel(Arc<AtomicU16>);

impl LightLevel {
    pub fn set(&self, raw: u16) {
        self.0.store(raw, Ordering::Relaxed);
    }

    pub fn get(&self) -> u16 {
        self.0.load(Ordering::Relaxed)
    }
}

enum LightSource {
    Level(LightLevel),
    Gesture { gesture: Gesture, clock: SessionClock },
}

/// Simulated light sensor.
pub struct ScriptedSensor {
    source: LightSource,
    reads: usize,
}

impl ScriptedSensor {
    pub fn constant(raw: u16) -> Self {
        Self::shared(raw).0
    }

    /// A sensor whose level is set through the returned handle.
    pub fn shared(raw: u16) -> (Self, LightLevel) {
        let level = LightLevel(Arc::new(AtomicU16::new(raw)));
        let sensor = Self {
            source: LightSource::Level(level.clone()),
            reads: 0,
        };
        (sensor, level)
    }

    /// A sensor following `gesture` in wall-clock time.
    pub fn gesture(gesture: Gesture, clock: SessionClock) -> Self {
        info!("Simulated light: {:?}", gesture);
        Self {
            source: LightSource::Gesture { gesture, clock },
            reads: 0,
        }
    }

    /// Number of reads so far.
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl LightSensor for ScriptedSensor {
    fn read_raw(&mut self) -> u16 {
        self.reads += 1;
        match &self.source {
            LightSource::Level(level) => level.get(),
            LightSource::Gesture { gesture, clock } => gesture.raw_at(clock.now_ms()),
        }
    }
}

// ─── Buttons ────────────────────────────────────────────────────────────────

const BIT_A: u8 = 0b01;
const BIT_B: u8 = 0b10;

fn bit(button: Button) -> u8 {
    match button {
        Button::A => BIT_A,
        Button::B => BIT_B,
    }
}

/// Presses buttons on a [`SimButtons`] from another thread or a test.
#[derive(Debug, Clone)]
pub struct ButtonPresser(Arc<AtomicU8>);

impl ButtonPresser {
    /// The button reads low on the next poll only, then high again.
    pub fn press(&self, button: Button) {
        self.0.fetch_or(bit(button), Ordering::Relaxed);
    }
}

/// Two simulated active-low buttons, optionally driven by a timed script.
pub struct SimButtons {
    pending: Arc<AtomicU8>,
    script: Vec<(u64, Button)>,
    clock: Option<SessionClock>,
}

impl SimButtons {
    pub fn new() -> (Self, ButtonPresser) {
        let pending = Arc::new(AtomicU8::new(0));
        let buttons = Self {
            pending: pending.clone(),
            script: Vec::new(),
            clock: None,
        };
        (buttons, ButtonPresser(pending))
    }

    /// Press each button once its time (ms on `clock`) has passed.
    pub fn with_script(mut self, clock: SessionClock, mut script: Vec<(u64, Button)>) -> Self {
        script.sort_by_key(|(t, _)| std::cmp::Reverse(*t));
        self.script = script;
        self.clock = Some(clock);
        self
    }

    fn fire_script(&mut self) {
        let Some(clock) = &self.clock else { return };
        let now = clock.now_ms();
        while let Some(&(t, button)) = self.script.last() {
            if t > now {
                break;
            }
            info!("Simulated press: button {:?}", button);
            self.pending.fetch_or(bit(button), Ordering::Relaxed);
            self.script.pop();
        }
    }
}

impl ButtonInputs for SimButtons {
    fn level(&mut self, button: Button) -> bool {
        if button == Button::A {
            self.fire_script();
        }
        let b = bit(button);
        let was = self.pending.fetch_and(!b, Ordering::Relaxed);
        was & b == 0
    }
}

/// The demo script: start recording, stop, then play it back.
pub fn demo_script() -> Vec<(u64, Button)> {
    vec![(6000, Button::A), (12000, Button::A), (13000, Button::B)]
}

// ─── Tone outputs ───────────────────────────────────────────────────────────

/// Stand-in buzzer that logs what the device would play.
#[derive(Debug, Default)]
pub struct LogBuzzer;

impl ToneOutput for LogBuzzer {
    fn play(&mut self, frequency_hz: u32, duty: f32) {
        info!("♪ {} Hz (duty {:.2})", frequency_hz, duty);
    }

    fn silence(&mut self) {
        info!("♪ silence");
    }
}

/// What the actuator was told to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToneCall {
    Play { frequency_hz: u32, duty: f32 },
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneEntry {
    pub at_ms: u64,
    pub call: ToneCall,
}

/// A `Play` entry, flattened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayEntry {
    pub at_ms: u64,
    pub frequency_hz: u32,
    pub duty: f32,
}

#[derive(Default)]
struct LogInner {
    now_ms: u64,
    entries: Vec<ToneEntry>,
}

/// Recording tone output. Clones share one log; stamp entries by calling
/// `set_time` before driving the node.
#[derive(Clone, Default)]
pub struct ToneLog {
    inner: Arc<Mutex<LogInner>>,
}

impl ToneLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_time(&self, now_ms: u64) {
        self.lock().now_ms = now_ms;
    }

    pub fn entries(&self) -> Vec<ToneEntry> {
        self.lock().entries.clone()
    }

    pub fn calls(&self) -> Vec<ToneCall> {
        self.lock().entries.iter().map(|e| e.call).collect()
    }

    pub fn plays(&self) -> Vec<PlayEntry> {
        self.lock()
            .entries
            .iter()
            .filter_map(|e| match e.call {
                ToneCall::Play { frequency_hz, duty } => Some(PlayEntry {
                    at_ms: e.at_ms,
                    frequency_hz,
                    duty,
                }),
                ToneCall::Silence => None,
            })
            .collect()
    }

    pub fn last(&self) -> Option<ToneCall> {
        self.lock().entries.last().map(|e| e.call)
    }

    /// Number of times the actuator was switched to a tone.
    pub fn activations(&self) -> usize {
        self.plays().len()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn push(&self, call: ToneCall) {
        let mut inner = self.lock();
        let at_ms = inner.now_ms;
        inner.entries.push(ToneEntry { at_ms, call });
    }
}

impl ToneOutput for ToneLog {
    fn play(&mut self, frequency_hz: u32, duty: f32) {
        self.push(ToneCall::Play { frequency_hz, duty });
    }

    fn silence(&mut self) {
        self.push(ToneCall::Silence);
    }
}

/// Fans one actuator out to several outputs (e.g. log + OSC mirror).
pub struct TeeOutput {
    outputs: Vec<Box<dyn ToneOutput>>,
}

impl TeeOutput {
    pub fn new(outputs: Vec<Box<dyn ToneOutput>>) -> Self {
        Self { outputs }
    }
}

impl ToneOutput for TeeOutput {
    fn play(&mut self, frequency_hz: u32, duty: f32) {
        for o in &mut self.outputs {
            o.play(frequency_hz, duty);
        }
    }

    fn silence(&mut self) {
        for o in &mut self.outputs {
            o.silence();
        }
    }
}

// ─── Math helpers ───────────────────────────────────────────────────────────

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Smooth interpolation (ease in/out)
fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
