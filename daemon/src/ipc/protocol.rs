//! Panel message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::DeviceEvent;
use crate::hal::Pin;
use crate::state::DeviceState;

/// Requests from a panel client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current device status
    GetStatus,

    /// Press or release one of the virtual buttons
    SetButton { button: Pin, pressed: bool },

    /// Press a button now and release it `hold_ms` later on the device clock
    PressButton { button: Pin, hold_ms: u64 },

    /// List the recordings on storage
    ListFiles,

    /// Stream device events on this connection
    Subscribe,
}

/// Responses from the daemon to a panel client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    Status(DeviceStatus),

    ButtonSet { button: Pin, pressed: bool },

    ButtonHeld { button: Pin, hold_ms: u64 },

    Files { names: Vec<String> },

    /// Subscription confirmed
    Subscribed,

    /// Pushed to subscribed clients; the event keeps its own tag under `event`
    Event { event: DeviceEvent },

    Error { code: String, message: String },
}

/// Device status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Daemon version
    pub version: String,

    pub state: DeviceState,

    pub config_mode: bool,

    /// Most recently kept message, if any
    pub last_recording: Option<String>,

    pub transfer_active: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DeviceState::default(),
            config_mode: false,
            last_recording: None,
            transfer_active: false,
            uptime_secs: 0,
        }
    }
}

impl DeviceStatus {
    /// Fold a device event into the snapshot
    pub fn apply(&mut self, event: &DeviceEvent) {
        match event {
            DeviceEvent::ConfigModeSelected { config_mode } => self.config_mode = *config_mode,
            DeviceEvent::StateChanged { to, .. } => self.state = *to,
            DeviceEvent::RecordingSaved { name, .. } => self.last_recording = Some(name.clone()),
            DeviceEvent::RecordingDiscarded { .. }
            | DeviceEvent::RecordingFailed { .. }
            | DeviceEvent::GreetingChanged { .. } => self.last_recording = None,
            DeviceEvent::TransferEnabled => self.transfer_active = true,
            DeviceEvent::TransferDisabled => self.transfer_active = false,
            DeviceEvent::StorageUnavailable { .. }
            | DeviceEvent::RecordingStarted
            | DeviceEvent::ConfirmationPrompted => {}
        }
    }
}
