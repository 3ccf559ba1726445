//! Transition table and guard evaluation
//!
//! Pure functions: a per-state guard turns an input snapshot into at most
//! one trigger, and the table maps (state, trigger) to an action and the
//! next state. Nothing here touches hardware.
//!
//! When several guards hold in the same iteration the first one checked
//! wins. The order is fixed per state: time limits, then the handset,
//! then the push-button, then playback completion.

use serde::{Deserialize, Serialize};

use crate::config::Timings;

/// The device states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Booting, before the config mode is known
    #[default]
    Init,
    /// Handset down, waiting for a caller
    Ready,
    /// Greeting or instructions playing
    Greeting,
    /// Capturing a message
    Recording,
    /// Reviewing the last message or the current greeting
    Playback,
    /// Config mode: replaying a new recording and asking to keep it
    ChangeGreeting,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Init => write!(f, "Init"),
            DeviceState::Ready => write!(f, "Ready"),
            DeviceState::Greeting => write!(f, "Greeting"),
            DeviceState::Recording => write!(f, "Recording"),
            DeviceState::Playback => write!(f, "Playback"),
            DeviceState::ChangeGreeting => write!(f, "ChangeGreeting"),
        }
    }
}

/// Step inside ChangeGreeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewPhase {
    /// The new recording is being replayed
    #[default]
    Replay,
    /// The confirmation prompt has started; the push-button saves
    Confirm,
}

/// Everything the guards look at, sampled once per iteration
#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot {
    pub config_mode: bool,
    /// Handset resting on the cradle
    pub handset_down: bool,
    /// Handset picked up on this iteration
    pub handset_lifted: bool,
    pub push_pressed: bool,
    pub push_held_ms: u64,
    /// Both playback channels are idle
    pub playback_done: bool,
    /// Time on the state's timer: since recording started, or since the
    /// confirmation prompt went quiet
    pub elapsed_ms: u64,
    pub transfer_active: bool,
    pub review: ReviewPhase,
}

/// What made a state leave (or act)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    HandsetLifted,
    HandsetDown,
    PushPressed,
    /// Push-button held long enough in config mode
    TransferHold,
    PlaybackDone,
    MaxDuration,
    /// Handset down or silence timeout while asking to keep the greeting
    ConfirmAbandoned,
}

/// How a recording was ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    /// Maximum recording time reached
    TimeLimit,
    /// Handset put down
    HungUp,
    /// Push-button in config mode, keep for review
    Review,
}

/// Side effect performed on a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    EnableTransfer,
    DisableTransfer,
    StopPlayback,
    /// Stop the greeting and acknowledge with a short beep
    SkipGreeting,
    QuietBeep { count: u32, interval_ms: u64 },
    /// Stop capture and decide what happens to the file. May divert to
    /// Ready when the recording is discarded or fails.
    FinishRecording(Finish),
    /// Beep, pause, play the "keep this greeting?" prompt
    PromptConfirmation,
    SaveGreeting,
    AbandonGreeting,
}

/// Table entry; `next: None` stays in the current state without re-entering it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: Action,
    pub next: Option<DeviceState>,
}

/// Look up the transition for a trigger, `None` when the state ignores it
pub fn lookup(state: DeviceState, trigger: Trigger) -> Option<Transition> {
    use DeviceState::*;

    let (action, next) = match (state, trigger) {
        (Ready, Trigger::HandsetLifted) => (Action::DisableTransfer, Some(Greeting)),
        (Ready, Trigger::TransferHold) => (Action::EnableTransfer, None),

        (Greeting, Trigger::HandsetDown) => (Action::StopPlayback, Some(Ready)),
        (Greeting, Trigger::PushPressed) => (Action::SkipGreeting, Some(Playback)),
        (Greeting, Trigger::PlaybackDone) => (
            Action::QuietBeep {
                count: 1,
                interval_ms: 500,
            },
            Some(Recording),
        ),

        (Recording, Trigger::MaxDuration) => (Action::FinishRecording(Finish::TimeLimit), Some(Ready)),
        (Recording, Trigger::HandsetDown) => (Action::FinishRecording(Finish::HungUp), Some(Ready)),
        (Recording, Trigger::PushPressed) => {
            (Action::FinishRecording(Finish::Review), Some(ChangeGreeting))
        }

        (Playback, Trigger::HandsetDown) => (Action::StopPlayback, Some(Ready)),
        (Playback, Trigger::PlaybackDone) => (
            Action::QuietBeep {
                count: 3,
                interval_ms: 250,
            },
            Some(Ready),
        ),

        (ChangeGreeting, Trigger::HandsetDown) => (Action::StopPlayback, Some(Ready)),
        (ChangeGreeting, Trigger::PlaybackDone) => (Action::PromptConfirmation, None),
        (ChangeGreeting, Trigger::PushPressed) => (Action::SaveGreeting, Some(Ready)),
        (ChangeGreeting, Trigger::ConfirmAbandoned) => (Action::AbandonGreeting, Some(Ready)),

        _ => return None,
    };

    Some(Transition { action, next })
}

/// Run the guards of `state` against a snapshot
pub fn evaluate(state: DeviceState, snapshot: &Snapshot, timings: &Timings) -> Option<Trigger> {
    match state {
        DeviceState::Init => None,
        DeviceState::Ready => ready_guard(snapshot, timings),
        DeviceState::Greeting => greeting_guard(snapshot),
        DeviceState::Recording => recording_guard(snapshot, timings),
        DeviceState::Playback => playback_guard(snapshot),
        DeviceState::ChangeGreeting => change_greeting_guard(snapshot, timings),
    }
}

fn ready_guard(s: &Snapshot, timings: &Timings) -> Option<Trigger> {
    if s.handset_lifted {
        Some(Trigger::HandsetLifted)
    } else if s.config_mode
        && s.push_pressed
        && s.push_held_ms > timings.transfer_hold_ms
        && !s.transfer_active
    {
        Some(Trigger::TransferHold)
    } else {
        None
    }
}

fn greeting_guard(s: &Snapshot) -> Option<Trigger> {
    if s.handset_down {
        Some(Trigger::HandsetDown)
    } else if s.push_pressed {
        Some(Trigger::PushPressed)
    } else if s.playback_done {
        Some(Trigger::PlaybackDone)
    } else {
        None
    }
}

fn recording_guard(s: &Snapshot, timings: &Timings) -> Option<Trigger> {
    if s.elapsed_ms > timings.max_recording_ms {
        Some(Trigger::MaxDuration)
    } else if s.handset_down {
        Some(Trigger::HandsetDown)
    } else if s.config_mode && s.push_pressed {
        Some(Trigger::PushPressed)
    } else {
        None
    }
}

fn playback_guard(s: &Snapshot) -> Option<Trigger> {
    if s.handset_down {
        Some(Trigger::HandsetDown)
    } else if s.playback_done {
        Some(Trigger::PlaybackDone)
    } else {
        None
    }
}

fn change_greeting_guard(s: &Snapshot, timings: &Timings) -> Option<Trigger> {
    match s.review {
        ReviewPhase::Replay => {
            if s.handset_down {
                Some(Trigger::HandsetDown)
            } else if s.playback_done {
                Some(Trigger::PlaybackDone)
            } else {
                None
            }
        }
        ReviewPhase::Confirm => {
            if s.handset_down || s.elapsed_ms > timings.confirm_timeout_ms {
                Some(Trigger::ConfirmAbandoned)
            } else if s.push_pressed {
                Some(Trigger::PushPressed)
            } else {
                None
            }
        }
    }
}
