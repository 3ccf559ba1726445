//! Button input for the handset switch and push-button
//!
//! Raw pin levels are debounced with a stable-interval filter and exposed
//! as pressed/edge/duration predicates for the state machine.

mod button;
mod controller;

pub use controller::InputController;
