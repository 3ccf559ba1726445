//! Events module for state machine transitions
//!
//! Provides structured event types for state changes, recording
//! outcomes, greeting changes and transfer activation.

use serde::{Deserialize, Serialize};

use crate::state::DeviceState;

/// Why a finished recording was thrown away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Shorter than the minimum file size
    TooShort,
    /// Handset put down while authoring a greeting
    HungUp,
}

/// Events emitted by the state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// Boot finished sampling the push-button
    ConfigModeSelected { config_mode: bool },

    /// Storage failed to mount at boot, will retry
    StorageUnavailable { attempt: u32 },

    StateChanged {
        from: DeviceState,
        to: DeviceState,
        /// Time spent in `from`
        duration_ms: u64,
    },

    RecordingStarted,

    /// Recording kept under a sequential name
    RecordingSaved { name: String, bytes: u64 },

    RecordingDiscarded { bytes: u64, reason: DiscardReason },

    /// Session could not be opened, written or finalized
    RecordingFailed { reason: String },

    /// Confirmation prompt started, the push-button now saves the greeting
    ConfirmationPrompted,

    /// A recording replaced the custom greeting
    GreetingChanged { recording: String },

    TransferEnabled,

    TransferDisabled,
}

impl std::fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::ConfigModeSelected { config_mode } => {
                write!(f, "CONFIG_MODE_SELECTED ({})", config_mode)
            }
            DeviceEvent::StorageUnavailable { attempt } => {
                write!(f, "STORAGE_UNAVAILABLE (attempt {})", attempt)
            }
            DeviceEvent::StateChanged { from, to, duration_ms } => {
                write!(f, "STATE_CHANGED ({} -> {}, {}ms)", from, to, duration_ms)
            }
            DeviceEvent::RecordingStarted => write!(f, "RECORDING_STARTED"),
            DeviceEvent::RecordingSaved { name, bytes } => {
                write!(f, "RECORDING_SAVED ({}, {} bytes)", name, bytes)
            }
            DeviceEvent::RecordingDiscarded { bytes, reason } => {
                write!(f, "RECORDING_DISCARDED ({:?}, {} bytes)", reason, bytes)
            }
            DeviceEvent::RecordingFailed { reason } => write!(f, "RECORDING_FAILED ({})", reason),
            DeviceEvent::ConfirmationPrompted => write!(f, "CONFIRMATION_PROMPTED"),
            DeviceEvent::GreetingChanged { recording } => {
                write!(f, "GREETING_CHANGED (from {})", recording)
            }
            DeviceEvent::TransferEnabled => write!(f, "TRANSFER_ENABLED"),
            DeviceEvent::TransferDisabled => write!(f, "TRANSFER_DISABLED"),
        }
    }
}
