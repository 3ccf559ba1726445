//! Hardware abstraction for the answering machine
//!
//! Thin traits over the audio graph, button pins, tone generator and
//! transfer service. The control core only talks to these; the host
//! binary plugs in the simulated peripherals from `crate::sim`.

mod clock;

pub use clock::{Clock, SystemClock};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::Storage;

/// Samples per capture block
pub const SAMPLES_PER_BLOCK: usize = 128;
/// Bytes per capture block (16-bit mono)
pub const BYTES_PER_BLOCK: usize = SAMPLES_PER_BLOCK * 2;

/// The two physical inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pin {
    /// Hook switch, closed while the handset rests on the cradle
    Handset,
    /// Record/review push-button
    PushButton,
}

/// Raw pin levels, `true` = high
pub trait PinReader: Send {
    fn level(&self, pin: Pin) -> bool;
}

/// Microphone capture queue filled by the audio subsystem
pub trait CaptureQueue: Send {
    fn begin(&mut self);
    fn end(&mut self);
    /// Number of blocks waiting to be read
    fn available(&mut self) -> usize;
    /// Oldest block, `BYTES_PER_BLOCK` long. Valid until `free_buffer`.
    fn read_buffer(&mut self) -> Option<&[u8]>;
    /// Release the block returned by `read_buffer`
    fn free_buffer(&mut self);
}

/// A WAV player on the output mixer
pub trait PlaybackChannel: Send {
    fn play(&mut self, name: &str);
    fn stop(&mut self);
    fn is_stopped(&self) -> bool;
}

/// Oscillator waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
}

/// Oscillator on the output mixer used for beeps
pub trait ToneGenerator: Send {
    fn begin(&mut self, volume: f32, frequency_hz: u32, waveform: Waveform);
    fn amplitude(&mut self, value: f32);
}

/// Exports the storage to a host (MTP on the device)
pub trait TransferService: Send {
    fn begin(&mut self);
    /// Serve pending host requests, called once per control loop iteration
    fn poll(&mut self);
}

/// Everything the control core drives
pub struct Peripherals {
    pub clock: Arc<dyn Clock>,
    pub pins: Box<dyn PinReader>,
    pub capture: Box<dyn CaptureQueue>,
    /// Fixed prompts and the default greeting
    pub prompts: Box<dyn PlaybackChannel>,
    /// User recordings and the custom greeting
    pub recordings: Box<dyn PlaybackChannel>,
    pub tone: Box<dyn ToneGenerator>,
    pub storage: Box<dyn Storage>,
    pub transfer: Box<dyn TransferService>,
}
