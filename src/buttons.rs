use crate::hardware::ButtonInputs;
use crate::types::Button;
use log::debug;

/// Falling-edge detector for the two active-low buttons, polled every 50 ms.
///
/// Both lines are assumed high (released) before the first poll, so a line
/// already low at boot counts as one press.
#[derive(Debug)]
pub struct ButtonMonitor {
    last_a: bool,
    last_b: bool,
}

impl ButtonMonitor {
    pub fn new() -> Self {
        Self {
            last_a: true,
            last_b: true,
        }
    }

    /// Sample both inputs; return the buttons pressed since the last poll
    /// (A before B).
    pub fn poll(&mut self, inputs: &mut dyn ButtonInputs) -> Vec<Button> {
        let mut pressed = Vec::new();

        let a = inputs.level(Button::A);
        if !a && self.last_a {
            debug!("button A pressed");
            pressed.push(Button::A);
        }
        self.last_a = a;

        let b = inputs.level(Button::B);
        if !b && self.last_b {
            debug!("button B pressed");
            pressed.push(Button::B);
        }
        self.last_b = b;

        pressed
    }
}

impl Default for ButtonMonitor {
    fn default() -> Self {
        Self::new()
    }
}
