//! Configuration loading and management

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for the virtual button panel
    pub socket_path: PathBuf,

    /// Root of the recording storage (the "card")
    pub storage_root: PathBuf,

    pub timings: Timings,
    pub volumes: Volumes,
    pub assets: Assets,
    pub recording: RecordingSettings,
}

/// Every fixed delay, window and limit the control loop uses, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    pub debounce_ms: u64,
    /// Push-button sampling window at boot that selects config mode
    pub boot_window_ms: u64,
    /// Pause before the greeting starts
    pub greeting_settle_ms: u64,
    /// Push-button hold in Ready that enables the transfer service
    pub transfer_hold_ms: u64,
    pub max_recording_ms: u64,
    /// Silence after the confirmation prompt before the change is abandoned
    pub confirm_timeout_ms: u64,
    pub confirm_pause_ms: u64,
    /// Delay between entering Recording and opening the capture, skips the switch click
    pub capture_settle_ms: u64,
    pub storage_retry_ms: u64,
    /// `None` retries forever
    pub storage_retry_limit: Option<u32>,
    /// Sleep at the end of every control loop iteration and every wait tick
    pub poll_interval_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            debounce_ms: 40,
            boot_window_ms: 1_000,
            greeting_settle_ms: 1_000,
            transfer_hold_ms: 5_000,
            max_recording_ms: 360_000,
            confirm_timeout_ms: 6_000,
            confirm_pause_ms: 500,
            capture_settle_ms: 50,
            storage_retry_ms: 2_000,
            storage_retry_limit: None,
            poll_interval_ms: 1,
        }
    }
}

/// Beep levels and tone
#[derive(Debug, Clone, PartialEq)]
pub struct Volumes {
    /// Used while the handset is down (boot, storage errors)
    pub beep_loud: f32,
    /// Used while the handset is at the ear
    pub beep_quiet: f32,
    pub beep_frequency_hz: u32,
}

impl Default for Volumes {
    fn default() -> Self {
        Self {
            beep_loud: 1.0,
            beep_quiet: 0.1,
            beep_frequency_hz: 440,
        }
    }
}

/// Fixed file names on the storage root
///
/// Everything under `protected_dir` ships with the device and is never
/// removed by normal operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assets {
    pub protected_dir: String,
    pub default_greeting: String,
    pub change_instructions: String,
    pub confirm_greeting: String,
    pub greeting_saved: String,
    pub message_too_short: String,
    pub no_message: String,
    /// Greeting recorded by the owner in config mode, optional
    pub custom_greeting: String,
    /// Reserved name of the file being captured
    pub temp_recording: String,
}

impl Default for Assets {
    fn default() -> Self {
        let dir = "Don't Delete";
        Self {
            protected_dir: dir.to_string(),
            default_greeting: format!("{dir}/Standard greeting.wav"),
            change_instructions: format!("{dir}/Change greeting instructions.wav"),
            confirm_greeting: format!("{dir}/Confirm new greeting.wav"),
            greeting_saved: format!("{dir}/Greeting saved.wav"),
            message_too_short: format!("{dir}/Message too short.wav"),
            no_message: format!("{dir}/No new message.wav"),
            custom_greeting: "Greeting.wav".to_string(),
            temp_recording: "temp.wav".to_string(),
        }
    }
}

impl Assets {
    /// Every asset that must exist before the device is useful
    pub fn protected(&self) -> [&str; 6] {
        [
            &self.default_greeting,
            &self.change_instructions,
            &self.confirm_greeting,
            &self.greeting_saved,
            &self.message_too_short,
            &self.no_message,
        ]
    }
}

/// Capture pipeline limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSettings {
    /// Recordings smaller than this (header included) are too short
    pub min_file_bytes: u64,
    pub blocks_per_write: usize,
    /// Number of sequential `NNNNN.wav` names available
    pub name_slots: u32,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            min_file_bytes: 150_000,
            blocks_per_write: 16,
            name_slots: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("answerphone");

        let storage_root = std::env::var_os("ANSWERPHONE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("sd"));
        let socket_path = std::env::var_os("ANSWERPHONE_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("panel.sock"));

        let mut config = Self::with_root(storage_root);
        config.socket_path = socket_path;
        Ok(config)
    }

    /// Default device settings on top of the given storage root
    pub fn with_root(storage_root: impl AsRef<Path>) -> Self {
        let storage_root = storage_root.as_ref().to_path_buf();
        Self {
            socket_path: storage_root.join("panel.sock"),
            storage_root,
            timings: Timings::default(),
            volumes: Volumes::default(),
            assets: Assets::default(),
            recording: RecordingSettings::default(),
        }
    }

    /// Ensure the storage root and its protected directory exist
    pub fn ensure_dirs(&self) -> Result<()> {
        let protected = self.storage_root.join(&self.assets.protected_dir);
        std::fs::create_dir_all(&protected)
            .with_context(|| format!("failed to create {}", protected.display()))?;
        Ok(())
    }
}
