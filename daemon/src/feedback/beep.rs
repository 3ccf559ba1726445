//! Beep pulses on the oscillator

use std::sync::Arc;

use tracing::debug;

use crate::hal::{Clock, ToneGenerator, Waveform};

/// A beep sequence: `count` pulses of `interval_ms`, separated by equal gaps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeepPattern {
    pub volume: f32,
    pub count: u32,
    pub interval_ms: u64,
}

impl BeepPattern {
    pub fn new(volume: f32, count: u32, interval_ms: u64) -> Self {
        Self {
            volume,
            count,
            interval_ms,
        }
    }

    /// Wall time the pattern occupies
    pub fn duration_ms(&self) -> u64 {
        match self.count {
            0 => 0,
            n => (2 * n as u64 - 1) * self.interval_ms,
        }
    }
}

/// Plays blocking beep sequences
pub struct BeepSignaler {
    tone: Box<dyn ToneGenerator>,
    clock: Arc<dyn Clock>,
    frequency_hz: u32,
}

impl BeepSignaler {
    pub fn new(tone: Box<dyn ToneGenerator>, clock: Arc<dyn Clock>, frequency_hz: u32) -> Self {
        Self {
            tone,
            clock,
            frequency_hz,
        }
    }

    /// Play `count` pulses; returns after the last pulse is silenced
    pub fn beep(&mut self, volume: f32, count: u32, interval_ms: u64) {
        debug!(volume, count, interval_ms, "beep");
        for i in 0..count {
            self.tone.begin(volume, self.frequency_hz, Waveform::Sine);
            self.clock.sleep_ms(interval_ms);
            self.tone.amplitude(0.0);
            if i + 1 < count {
                self.clock.sleep_ms(interval_ms);
            }
        }
    }

    pub fn play(&mut self, pattern: BeepPattern) {
        debug!(duration_ms = pattern.duration_ms(), "beep pattern");
        self.beep(pattern.volume, pattern.count, pattern.interval_ms);
    }
}
