//! Simulated peripherals
//!
//! Software stand-ins for the audio graph, pins and transfer service.
//! The host binary runs the control core on these, and the tests drive
//! them on a manual clock.

mod audio;
#[cfg(test)]
mod clock;
mod pins;
mod transfer;

pub use audio::{SimCaptureQueue, SimPlayback, SimTone};
#[cfg(test)]
pub use audio::{PlayLog, ToneLog};
#[cfg(test)]
pub use clock::ManualClock;
pub use pins::SimPins;
pub use transfer::SimTransfer;
#[cfg(test)]
pub use transfer::TransferStats;
