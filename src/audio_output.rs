//! Square-wave rendering of the actuator through the sound card.
//!
//! The oscillator is plain code and always built; the cpal stream that
//! drives it needs the `audio` feature.

use crate::hardware::ToneOutput;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Output level of the square wave.
pub const AMPLITUDE: f32 = 0.2;

/// Tone state shared between the node and the audio callback.
#[derive(Default)]
pub struct ToneState {
    frequency_hz: AtomicU32,
    duty_bits: AtomicU32,
}

impl ToneState {
    pub fn set(&self, frequency_hz: u32, duty: f32) {
        self.duty_bits
            .store(duty.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        self.frequency_hz.store(frequency_hz, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u32, f32) {
        (
            self.frequency_hz.load(Ordering::Relaxed),
            f32::from_bits(self.duty_bits.load(Ordering::Relaxed)),
        )
    }
}

/// Phase-continuous square oscillator.
pub struct SquareWave {
    sample_rate: f32,
    phase: f32,
}

impl SquareWave {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            phase: 0.0,
        }
    }

    /// Next sample; silent (and phase reset) when `frequency_hz` is 0.
    pub fn next_sample(&mut self, frequency_hz: u32, duty: f32) -> f32 {
        if frequency_hz == 0 || duty <= 0.0 {
            self.phase = 0.0;
            return 0.0;
        }
        let out = if self.phase < duty { AMPLITUDE } else { -AMPLITUDE };
        self.phase += frequency_hz as f32 / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        out
    }
}

/// `ToneOutput` that updates the shared state read by the audio callback.
pub struct AudioOutput {
    state: Arc<ToneState>,
}

impl AudioOutput {
    pub fn with_state(state: Arc<ToneState>) -> Self {
        Self { state }
    }
}

impl ToneOutput for AudioOutput {
    fn play(&mut self, frequency_hz: u32, duty: f32) {
        self.state.set(frequency_hz, duty);
    }

    fn silence(&mut self) {
        self.state.set(0, 0.0);
    }
}

#[cfg(feature = "audio")]
pub use device::start;

#[cfg(feature = "audio")]
mod device {
    use super::*;
    use crate::error::{NodeError, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, StreamConfig};
    use log::{error, info};
    use std::thread;

    fn build_stream(state: Arc<ToneState>) -> std::result::Result<cpal::Stream, String> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| "No default audio output device found".to_string())?;
        info!(
            "Audio output: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let supported = device
            .default_output_config()
            .map_err(|e| format!("No supported output config: {e}"))?;
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let channels = config.channels as usize;
        let mut osc = SquareWave::new(config.sample_rate.0);
        info!(
            "Output config: {}Hz  {} ch  {:?}",
            config.sample_rate.0, channels, format
        );

        let err_fn = |e: cpal::StreamError| error!("Audio stream error: {e}");

        let stream = match format {
            SampleFormat::F32 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _| {
                        let (freq, duty) = state.get();
                        for frame in data.chunks_mut(channels) {
                            let s = osc.next_sample(freq, duty);
                            frame.fill(s);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| e.to_string())?,
            SampleFormat::I16 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _| {
                        let (freq, duty) = state.get();
                        for frame in data.chunks_mut(channels) {
                            let s = (osc.next_sample(freq, duty) * i16::MAX as f32) as i16;
                            frame.fill(s);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| e.to_string())?,
            fmt => {
                return Err(format!(
                    "Unsupported sample format {fmt:?}. Use an F32 or I16 device."
                ))
            }
        };
        stream.play().map_err(|e| e.to_string())?;
        Ok(stream)
    }

    /// Open the default output device and return a tone output for it.
    ///
    /// The cpal stream lives on its own thread for the life of the process.
    pub fn start() -> Result<AudioOutput> {
        let state = Arc::new(ToneState::default());
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<std::result::Result<(), String>>(1);
        let thread_state = state.clone();
        thread::Builder::new()
            .name("audio-out".into())
            .spawn(move || match build_stream(thread_state) {
                Ok(_stream) => {
                    let _ = ready_tx.send(Ok(()));
                    loop {
                        thread::park();
                    }
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(AudioOutput::with_state(state)),
            Ok(Err(e)) => Err(NodeError::Hardware(e)),
            Err(_) => Err(NodeError::Hardware("audio thread exited".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_wave_duty() {
        let mut osc = SquareWave::new(8000);
        // 1 kHz at 8 kHz → 8 samples per period
        let period: Vec<f32> = (0..8).map(|_| osc.next_sample(1000, 0.25)).collect();
        let high = period.iter().filter(|&&s| s > 0.0).count();
        assert_eq!(high, 2);
        assert!(period.iter().all(|s| (s.abs() - AMPLITUDE).abs() < 1e-6));
    }

    #[test]
    fn test_zero_frequency_is_silent() {
        let mut osc = SquareWave::new(48000);
        assert_eq!(osc.next_sample(0, 0.5), 0.0);
        let state = Arc::new(ToneState::default());
        let mut out = AudioOutput::with_state(state.clone());
        out.play(523, 0.3);
        assert_eq!(state.get(), (523, 0.3));
        out.silence();
        assert_eq!(state.get().0, 0);
    }
}
