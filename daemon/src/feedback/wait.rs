//! Cooperative wait with an explicit cancellation condition

use crate::hal::Clock;
use crate::input::InputController;

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The timeout ran out
    Elapsed,
    /// The condition became true
    Satisfied,
}

/// Poll the buttons every `tick_ms` until `done` holds or `timeout_ms` runs out
///
/// `done` is checked right after each input update, so it sees fresh
/// edges. Without a timeout the wait lasts until `done` holds.
pub fn wait_until(
    clock: &dyn Clock,
    input: &mut InputController,
    timeout_ms: Option<u64>,
    tick_ms: u64,
    mut done: impl FnMut(&InputController) -> bool,
) -> WaitOutcome {
    let start = clock.now_ms();
    let tick_ms = tick_ms.max(1);

    loop {
        input.update();
        if done(input) {
            return WaitOutcome::Satisfied;
        }
        if let Some(timeout) = timeout_ms {
            if clock.elapsed_since(start) >= timeout {
                return WaitOutcome::Elapsed;
            }
        }
        clock.sleep_ms(tick_ms);
    }
}
