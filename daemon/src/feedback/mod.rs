//! User feedback: beep tones and cooperative waits
//!
//! Both block the control loop. A beep never polls the buttons; a wait
//! polls them every tick and ends early only on the condition it was
//! given.

mod beep;
mod wait;

pub use beep::{BeepPattern, BeepSignaler};
pub use wait::{wait_until, WaitOutcome};
