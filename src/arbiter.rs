//! Sole gateway to the tone actuator.
//!
//! # Arbitration rules
//!
//! * At most one request is active (driving the hardware) at any instant.
//! * Any request above `Priority::Live` supersedes whatever is active,
//!   including another transient. There is no queue: the old request is
//!   canceled, not deferred.
//! * A `Live` request takes effect only while nothing above `Live` is active;
//!   otherwise it is suppressed and `request` returns `None`. The live path
//!   checks [`ActuatorArbiter::is_busy`] and skips its tick instead.
//! * A request with `duration_ms` expires on its own; the scheduler calls
//!   [`ActuatorArbiter::expire`] at [`ActuatorArbiter::next_expiry`].
//! * A held request with frequency 0 keeps the slot but keeps the hardware
//!   silent (playback rests).

use crate::hardware::ToneOutput;
use crate::types::{Priority, ToneHandle, ToneRequest};
use log::{debug, trace};

#[derive(Debug, Clone, Copy)]
struct ActiveTone {
    handle: ToneHandle,
    request: ToneRequest,
    expires_at: Option<u64>,
}

pub struct ActuatorArbiter {
    output: Box<dyn ToneOutput>,
    next_id: u64,
    active: Option<ActiveTone>,
    /// Last state written to the hardware, to skip redundant writes.
    driving: Option<(u32, f32)>,
}

impl ActuatorArbiter {
    pub fn new(output: Box<dyn ToneOutput>) -> Self {
        Self {
            output,
            next_id: 1,
            active: None,
            driving: None,
        }
    }

    /// Submit a tone request. Returns the handle if it took effect,
    /// or None if a Live request was suppressed by a higher-priority one.
    pub fn request(&mut self, request: ToneRequest, now_ms: u64) -> Option<ToneHandle> {
        self.expire(now_ms);

        if request.priority == Priority::Live && self.is_busy(now_ms) {
            trace!("live request {} Hz suppressed", request.frequency_hz);
            return None;
        }

        if let Some(prev) = self.active.take() {
            if prev.request.priority > Priority::Live || request.priority > Priority::Live {
                debug!(
                    "{:?} {} Hz supersedes {:?} {} Hz",
                    request.priority,
                    request.frequency_hz,
                    prev.request.priority,
                    prev.request.frequency_hz
                );
            }
        }

        let handle = ToneHandle(self.next_id);
        self.next_id += 1;
        self.active = Some(ActiveTone {
            handle,
            request,
            expires_at: request.duration_ms.map(|d| now_ms + d),
        });

        if request.frequency_hz > 0 {
            self.drive(request.frequency_hz, request.duty);
        } else {
            self.quiet();
        }
        Some(handle)
    }

    /// Cancel a request. Silences the hardware if it was the active one;
    /// no-op if it already completed or was superseded.
    pub fn cancel(&mut self, handle: ToneHandle) {
        if self.active.map(|a| a.handle) == Some(handle) {
            self.active = None;
            self.quiet();
        }
    }

    /// Cancel whatever is active and silence the hardware.
    pub fn stop(&mut self) {
        self.active = None;
        self.quiet();
    }

    /// Retire a transient request whose duration has elapsed.
    pub fn expire(&mut self, now_ms: u64) {
        if let Some(a) = self.active {
            if a.expires_at.is_some_and(|t| t <= now_ms) {
                trace!("{:?} {} Hz expired", a.request.priority, a.request.frequency_hz);
                self.active = None;
                self.quiet();
            }
        }
    }

    /// When the active transient ends, if there is one.
    pub fn next_expiry(&self) -> Option<u64> {
        self.active.and_then(|a| a.expires_at)
    }

    /// True while a request above `Live` priority holds the actuator.
    pub fn is_busy(&self, now_ms: u64) -> bool {
        match self.active {
            Some(a) => {
                a.request.priority > Priority::Live
                    && a.expires_at.map_or(true, |t| t > now_ms)
            }
            None => false,
        }
    }

    pub fn is_active(&self, handle: ToneHandle) -> bool {
        self.active.map(|a| a.handle) == Some(handle)
    }

    /// The request currently holding the actuator.
    pub fn active_request(&self) -> Option<ToneRequest> {
        self.active.map(|a| a.request)
    }

    fn drive(&mut self, frequency_hz: u32, duty: f32) {
        if self.driving != Some((frequency_hz, duty)) {
            self.output.play(frequency_hz, duty);
            self.driving = Some((frequency_hz, duty));
        }
    }

    fn quiet(&mut self) {
        if self.driving.is_some() {
            self.output.silence();
            self.driving = None;
        }
    }
}
