//! Virtual button pins with an optional time script

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::hal::{Clock, Pin, PinReader};

#[derive(Debug, Clone, Copy)]
struct ScriptedEdge {
    at_ms: u64,
    pin: Pin,
    pressed: bool,
}

#[derive(Debug)]
struct PinState {
    handset_level: bool,
    push_level: bool,
    /// Pending changes, ordered by time
    script: Vec<ScriptedEdge>,
}

impl PinState {
    fn set(&mut self, pin: Pin, pressed: bool) {
        // active low
        let level = !pressed;
        match pin {
            Pin::Handset => self.handset_level = level,
            Pin::PushButton => self.push_level = level,
        }
    }
}

/// Shared pin levels
///
/// Starts with the handset on the cradle and the push-button up. Clones
/// share state, so the panel socket or a test can flip buttons while the
/// controller owns another clone.
#[derive(Clone)]
pub struct SimPins {
    state: Arc<Mutex<PinState>>,
    clock: Arc<dyn Clock>,
}

impl SimPins {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PinState {
                handset_level: false,
                push_level: true,
                script: Vec::new(),
            })),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, PinState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Press or release a button now
    pub fn set_pressed(&self, pin: Pin, pressed: bool) {
        self.state().set(pin, pressed);
    }

    /// Press or release a button once the clock reaches `at_ms`
    pub fn schedule(&self, at_ms: u64, pin: Pin, pressed: bool) {
        let mut state = self.state();
        let index = state.script.partition_point(|edge| edge.at_ms <= at_ms);
        state.script.insert(index, ScriptedEdge { at_ms, pin, pressed });
    }

    /// Press or release a button `delay_ms` from now
    pub fn schedule_in(&self, delay_ms: u64, pin: Pin, pressed: bool) {
        self.schedule(self.clock.now_ms() + delay_ms, pin, pressed);
    }

    #[cfg(test)]
    pub fn is_pressed(&self, pin: Pin) -> bool {
        !self.level(pin)
    }
}

impl PinReader for SimPins {
    fn level(&self, pin: Pin) -> bool {
        let now = self.clock.now_ms();
        let mut state = self.state();

        let due = state.script.partition_point(|edge| edge.at_ms <= now);
        let applied: Vec<ScriptedEdge> = state.script.drain(..due).collect();
        for edge in applied {
            state.set(edge.pin, edge.pressed);
        }

        match pin {
            Pin::Handset => state.handset_level,
            Pin::PushButton => state.push_level,
        }
    }
}
