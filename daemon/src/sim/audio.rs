//! Simulated audio graph: capture queue, playback channels, oscillator

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::hal::{
    CaptureQueue, Clock, PlaybackChannel, ToneGenerator, Waveform, BYTES_PER_BLOCK,
    SAMPLES_PER_BLOCK,
};

const SAMPLE_RATE: u64 = 44_100;
/// 441 Hz divides the sample rate evenly
const TONE_PERIOD: usize = 100;
const TONE_AMPLITUDE: f32 = 3_000.0;

/// Produced/dropped block counters, shared across clones
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    produced: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl CaptureStats {
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Microphone queue paced by the clock
///
/// Produces one 128-sample block every 128/44100 s while capturing and
/// holds at most `capacity` blocks; anything beyond is dropped as an
/// overrun, the way the audio library runs out of block memory.
pub struct SimCaptureQueue {
    clock: Arc<dyn Clock>,
    capacity: usize,
    pending: VecDeque<[u8; BYTES_PER_BLOCK]>,
    capturing: bool,
    began_at: u64,
    /// Blocks produced since `begin`, dropped ones included
    produced: u64,
    tone: [i16; TONE_PERIOD],
    stats: CaptureStats,
}

impl SimCaptureQueue {
    pub fn new(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        let mut tone = [0i16; TONE_PERIOD];
        for (i, sample) in tone.iter_mut().enumerate() {
            let phase = i as f32 / TONE_PERIOD as f32 * std::f32::consts::TAU;
            *sample = (phase.sin() * TONE_AMPLITUDE) as i16;
        }

        Self {
            clock,
            capacity,
            pending: VecDeque::with_capacity(capacity),
            capturing: false,
            began_at: 0,
            produced: 0,
            tone,
            stats: CaptureStats::default(),
        }
    }

    #[cfg(test)]
    pub fn stats(&self) -> CaptureStats {
        self.stats.clone()
    }

    fn fill_block(&self, index: u64) -> [u8; BYTES_PER_BLOCK] {
        let mut block = [0u8; BYTES_PER_BLOCK];
        let first = index as usize * SAMPLES_PER_BLOCK;
        for (i, chunk) in block.chunks_exact_mut(2).enumerate() {
            let sample = self.tone[(first + i) % TONE_PERIOD];
            chunk.copy_from_slice(&sample.to_le_bytes());
        }
        block
    }

    /// Catch up with the blocks the microphone delivered since the last call
    fn produce(&mut self) {
        if !self.capturing {
            return;
        }

        let elapsed = self.clock.elapsed_since(self.began_at);
        let due = elapsed * SAMPLE_RATE / (SAMPLES_PER_BLOCK as u64 * 1_000);
        let mut dropped = 0;

        while self.produced < due {
            if self.pending.len() >= self.capacity {
                dropped += 1;
            } else {
                let block = self.fill_block(self.produced);
                self.pending.push_back(block);
            }
            self.produced += 1;
            self.stats.produced.fetch_add(1, Ordering::SeqCst);
        }

        if dropped > 0 {
            self.stats.dropped.fetch_add(dropped, Ordering::SeqCst);
            warn!(dropped, capacity = self.capacity, "capture queue overrun");
        }
    }
}

impl CaptureQueue for SimCaptureQueue {
    fn begin(&mut self) {
        self.pending.clear();
        self.capturing = true;
        self.began_at = self.clock.now_ms();
        self.produced = 0;
    }

    fn end(&mut self) {
        self.produce();
        self.capturing = false;
        debug!(
            blocks = self.produced,
            produced_total = self.stats.produced(),
            dropped_total = self.stats.dropped(),
            "capture ended"
        );
    }

    fn available(&mut self) -> usize {
        self.produce();
        self.pending.len()
    }

    fn read_buffer(&mut self) -> Option<&[u8]> {
        self.pending.front().map(|block| block.as_slice())
    }

    fn free_buffer(&mut self) {
        self.pending.pop_front();
    }
}

/// Names started on a playback channel, in order
#[derive(Debug, Clone, Default)]
pub struct PlayLog {
    names: Arc<Mutex<Vec<String>>>,
}

impl PlayLog {
    fn names(&self) -> MutexGuard<'_, Vec<String>> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn played(&self) -> Vec<String> {
        self.names().clone()
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<String> {
        self.names().last().cloned()
    }
}

type DurationLookup = Box<dyn Fn(&str) -> u64 + Send>;

/// Playback channel that finishes after each file's duration
pub struct SimPlayback {
    clock: Arc<dyn Clock>,
    duration_of: DurationLookup,
    playing: Option<(String, u64)>,
    log: PlayLog,
}

impl SimPlayback {
    /// Every file plays for `duration_ms`
    #[cfg(test)]
    pub fn new(clock: Arc<dyn Clock>, duration_ms: u64) -> Self {
        Self::with_durations(clock, move |_| duration_ms)
    }

    pub fn with_durations(clock: Arc<dyn Clock>, duration_of: impl Fn(&str) -> u64 + Send + 'static) -> Self {
        Self {
            clock,
            duration_of: Box::new(duration_of),
            playing: None,
            log: PlayLog::default(),
        }
    }

    #[cfg(test)]
    pub fn log(&self) -> PlayLog {
        self.log.clone()
    }
}

impl PlaybackChannel for SimPlayback {
    fn play(&mut self, name: &str) {
        let duration = (self.duration_of)(name);
        let ends_at = self.clock.now_ms() + duration;
        debug!(name, duration_ms = duration, "playback started");
        self.log.names().push(name.to_string());
        self.playing = Some((name.to_string(), ends_at));
    }

    fn stop(&mut self) {
        if let Some((name, _)) = self.playing.take() {
            debug!(name, "playback stopped");
        }
    }

    fn is_stopped(&self) -> bool {
        match &self.playing {
            Some((_, ends_at)) => self.clock.now_ms() >= *ends_at,
            None => true,
        }
    }
}

/// Volumes of every beep pulse started
#[derive(Debug, Clone, Default)]
pub struct ToneLog {
    pulses: Arc<Mutex<Vec<f32>>>,
}

impl ToneLog {
    fn pulses_mut(&self) -> MutexGuard<'_, Vec<f32>> {
        self.pulses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn pulses(&self) -> Vec<f32> {
        self.pulses_mut().clone()
    }

    #[cfg(test)]
    pub fn count(&self) -> usize {
        self.pulses_mut().len()
    }
}

/// Oscillator that records its pulses
#[derive(Default)]
pub struct SimTone {
    log: ToneLog,
}

impl SimTone {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn log(&self) -> ToneLog {
        self.log.clone()
    }
}

impl ToneGenerator for SimTone {
    fn begin(&mut self, volume: f32, frequency_hz: u32, waveform: Waveform) {
        debug!(volume, frequency_hz, ?waveform, "tone on");
        self.log.pulses_mut().push(volume);
    }

    fn amplitude(&mut self, value: f32) {
        debug!(value, "tone amplitude");
    }
}
