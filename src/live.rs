use crate::arbiter::ActuatorArbiter;
use crate::mapping::LightToPitchMapper;
use crate::types::{SensorSample, ToneHandle, ToneRequest, NOTES};
use log::trace;

/// Live Play: light level straight to the actuator at Live priority.
///
/// A new request is issued only when the pitch index changes, or when the
/// previous live request lost the actuator (a transient superseded it and
/// has since ended), so live play resumes by itself.
#[derive(Debug, Default)]
pub struct LivePath {
    last_index: Option<usize>,
    handle: Option<ToneHandle>,
}

impl LivePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(
        &mut self,
        now_ms: u64,
        sample: SensorSample,
        mapper: &LightToPitchMapper,
        arbiter: &mut ActuatorArbiter,
        noise_threshold: f32,
        duty: f32,
    ) {
        if sample.normalized > noise_threshold {
            let index = mapper.pitch_index(sample.normalized);
            let holding = self.handle.is_some_and(|h| arbiter.is_active(h));
            if self.last_index != Some(index) || !holding {
                trace!("live {} Hz ({})", NOTES[index], sample);
                self.handle = arbiter.request(ToneRequest::live(NOTES[index], duty), now_ms);
                self.last_index = self.handle.map(|_| index);
            }
        } else {
            self.silence(arbiter);
        }
    }

    /// Drop the live tone (if it still holds the actuator).
    pub fn silence(&mut self, arbiter: &mut ActuatorArbiter) {
        if let Some(h) = self.handle.take() {
            arbiter.cancel(h);
        }
        self.last_index = None;
    }
}
