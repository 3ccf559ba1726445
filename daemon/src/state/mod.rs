//! Device state machine
//!
//! Six states driven by the handset and push-button:
//! - Init: boot, storage mount and config mode sampling
//! - Ready: handset down, waiting for a lift
//! - Greeting: playing the greeting (or the config instructions)
//! - Recording: capturing a message
//! - Playback: reviewing the last message, or the greeting in config mode
//! - ChangeGreeting: replaying a new greeting and asking to keep it

mod boot;
mod machine;
mod transitions;

#[cfg(test)]
mod scenarios;

pub use machine::StateMachine;
pub use transitions::DeviceState;
