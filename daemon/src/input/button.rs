//! Debounced button with edge and hold-duration tracking

/// One physical button behind a stable-interval debouncer
///
/// A raw level change is accepted once it has held for the debounce
/// interval. Edge flags stay set for exactly one `update`.
#[derive(Debug, Clone)]
pub struct DebouncedButton {
    /// Raw level that counts as "pressed"
    pressed_level: bool,
    interval_ms: u64,
    /// Last raw sample and when it last changed
    raw: bool,
    raw_changed_at: u64,
    /// Debounced level and when it last changed
    stable: bool,
    stable_since: u64,
    changed: bool,
}

impl DebouncedButton {
    /// Create a button whose debounced level starts at `initial_level`
    pub fn new(pressed_level: bool, interval_ms: u64, initial_level: bool, now_ms: u64) -> Self {
        Self {
            pressed_level,
            interval_ms,
            raw: initial_level,
            raw_changed_at: now_ms,
            stable: initial_level,
            stable_since: now_ms,
            changed: false,
        }
    }

    /// Feed one raw sample
    pub fn update(&mut self, level: bool, now_ms: u64) {
        self.changed = false;

        if level != self.raw {
            self.raw = level;
            self.raw_changed_at = now_ms;
        } else if now_ms.saturating_sub(self.raw_changed_at) >= self.interval_ms
            && level != self.stable
        {
            self.stable = level;
            self.stable_since = now_ms;
            self.changed = true;
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.stable == self.pressed_level
    }

    /// Became pressed on the last update
    pub fn pressed(&self) -> bool {
        self.changed && self.is_pressed()
    }

    /// Became released on the last update
    pub fn released(&self) -> bool {
        self.changed && !self.is_pressed()
    }

    /// Milliseconds since the current press began, 0 when released
    pub fn duration(&self, now_ms: u64) -> u64 {
        if self.is_pressed() {
            now_ms.saturating_sub(self.stable_since)
        } else {
            0
        }
    }
}
