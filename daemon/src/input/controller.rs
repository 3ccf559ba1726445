//! Polled input controller for the handset switch and push-button

use std::sync::Arc;

use tracing::debug;

use crate::hal::{Clock, Pin, PinReader};

use super::button::DebouncedButton;

/// Both switches are wired to ground with pull-ups: closed reads low
const PRESSED_LEVEL: bool = false;

/// Debounced view of the two buttons
///
/// `update` must run once per control loop iteration before any of the
/// predicates are read. Nothing here blocks.
pub struct InputController {
    pins: Box<dyn PinReader>,
    clock: Arc<dyn Clock>,
    handset: DebouncedButton,
    push: DebouncedButton,
}

impl InputController {
    pub fn new(pins: Box<dyn PinReader>, clock: Arc<dyn Clock>, debounce_ms: u64) -> Self {
        let now = clock.now_ms();
        let handset = DebouncedButton::new(PRESSED_LEVEL, debounce_ms, pins.level(Pin::Handset), now);
        let push = DebouncedButton::new(PRESSED_LEVEL, debounce_ms, pins.level(Pin::PushButton), now);
        Self {
            pins,
            clock,
            handset,
            push,
        }
    }

    /// Sample both pins and recompute debounced state
    pub fn update(&mut self) {
        let now = self.clock.now_ms();
        self.handset.update(self.pins.level(Pin::Handset), now);
        self.push.update(self.pins.level(Pin::PushButton), now);

        if self.handset.pressed() || self.handset.released() {
            debug!(on_hook = self.handset.is_pressed(), "handset edge");
        }
        if self.push.pressed() || self.push.released() {
            debug!(pressed = self.push.is_pressed(), "push-button edge");
        }
    }

    fn button(&self, pin: Pin) -> &DebouncedButton {
        match pin {
            Pin::Handset => &self.handset,
            Pin::PushButton => &self.push,
        }
    }

    /// Debounced level; for the handset, pressed means resting on the cradle
    pub fn is_pressed(&self, pin: Pin) -> bool {
        self.button(pin).is_pressed()
    }

    /// True only on the update where the button was let go
    pub fn released(&self, pin: Pin) -> bool {
        self.button(pin).released()
    }

    /// Milliseconds since the current press began, 0 when not pressed
    pub fn duration(&self, pin: Pin) -> u64 {
        self.button(pin).duration(self.clock.now_ms())
    }

    /// Handset down and push-button up
    pub fn at_rest(&self) -> bool {
        self.handset.is_pressed() && !self.push.is_pressed()
    }
}
