//! Boot sequence: storage mount with retry, config mode sampling

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::config::Timings;
use crate::feedback::{wait_until, BeepPattern, BeepSignaler};
use crate::hal::{Clock, Pin};
use crate::input::InputController;
use crate::storage::Storage;

/// Beeped after every failed mount
pub const STORAGE_ERROR_BEEP_COUNT: u32 = 4;
pub const STORAGE_ERROR_BEEP_MS: u64 = 250;

/// Errors that keep the device from leaving boot
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("storage still unavailable after {attempts} attempts")]
    StorageUnavailable { attempts: u32 },

    #[error("halted during boot")]
    Halted,
}

/// Mount the storage, beeping and retrying while it is missing
///
/// `on_failure` is called with the attempt number after each failure.
/// Returns the number of attempts it took.
pub fn mount_storage(
    storage: &mut dyn Storage,
    beeper: &mut BeepSignaler,
    clock: &dyn Clock,
    timings: &Timings,
    volume: f32,
    halt: &AtomicBool,
    mut on_failure: impl FnMut(u32),
) -> Result<u32, BootError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match storage.begin() {
            Ok(()) => {
                info!(attempts = attempt, "storage mounted");
                return Ok(attempt);
            }
            Err(e) => {
                warn!(?e, attempt, "storage unavailable, retrying");
                on_failure(attempt);
            }
        }

        if timings.storage_retry_limit.is_some_and(|limit| attempt >= limit) {
            return Err(BootError::StorageUnavailable { attempts: attempt });
        }
        if halt.load(Ordering::SeqCst) {
            return Err(BootError::Halted);
        }

        beeper.play(BeepPattern::new(volume, STORAGE_ERROR_BEEP_COUNT, STORAGE_ERROR_BEEP_MS));
        clock.sleep_ms(timings.storage_retry_ms);
    }
}

/// Boot-time choice between normal and config mode
pub struct ConfigModeGate;

impl ConfigModeGate {
    /// Config mode iff the push-button is held for the whole window
    pub fn sample(clock: &dyn Clock, input: &mut InputController, window_ms: u64, tick_ms: u64) -> bool {
        let mut held = true;
        wait_until(clock, input, Some(window_ms), tick_ms, |input| {
            held &= input.is_pressed(Pin::PushButton);
            false
        });
        held
    }
}
