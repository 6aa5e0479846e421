//! The hardware seam: light sensor, tone actuator, push buttons.
//!
//! Backends: `simulator` (no hardware), `osc_output` (mirror to a synth),
//! `serial_bridge` (microcontroller over USB serial, feature `hardware`),
//! `audio_output` (square wave on the sound card, feature `audio`).

use crate::types::Button;

/// Ambient light sensor. Reads are side-effect free.
pub trait LightSensor: Send {
    /// Raw 16-bit reading (0 = dark end of the ADC range).
    fn read_raw(&mut self) -> u16;
}

/// The single tone-generating actuator (a PWM-driven buzzer on the device).
///
/// Only `ActuatorArbiter` holds one of these.
pub trait ToneOutput: Send {
    /// Drive the actuator at `frequency_hz` with `duty` in 0.0–1.0.
    fn play(&mut self, frequency_hz: u32, duty: f32);
    fn silence(&mut self);
}

/// Two active-low push buttons.
pub trait ButtonInputs: Send {
    /// Current pin level: `true` = high (released), `false` = low (pressed).
    fn level(&mut self, button: Button) -> bool;
}

/// Converts a 0.0–1.0 duty into the 16-bit PWM compare value.
pub fn duty_to_u16(duty: f32) -> u16 {
    (duty.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duty_conversion() {
        assert_eq!(duty_to_u16(0.0), 0);
        assert_eq!(duty_to_u16(1.0), 65535);
        assert_eq!(duty_to_u16(0.5), 32768);
        assert_eq!(duty_to_u16(2.0), 65535);
    }
}
