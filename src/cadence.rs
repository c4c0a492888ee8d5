//! Sampling cadence state machine.
//!
//! Owns the current sampling period and the ordered preset list the mode
//! button cycles through. Two producers mutate it (button edge, serial
//! command); the tick path only reads it.

use std::time::{Duration, Instant};

// Preset encoding: resolution in bits 7:6, count in bits 5:0.
const RES_100_MS: u8 = 0 << 6;
const RES_1_SEC: u8 = 1 << 6;
const RES_10_SEC: u8 = 2 << 6;
const RES_MASK: u8 = 0xC0;
const COUNT_MASK: u8 = 0x3F;

const fn secs(count: u8) -> u8 {
    RES_1_SEC | (count & COUNT_MASK)
}

const fn tens_of_secs(count: u8) -> u8 {
    RES_10_SEC | (count & COUNT_MASK)
}

/// Button-selectable sampling periods, in press order. The zero entry
/// suspends sampling until the next press wraps around.
pub const PERIOD_PRESETS: [u8; 4] = [secs(1), secs(10), tens_of_secs(6), 0];

/// Hard floor for serially configured periods.
pub const MIN_COMMAND_PERIOD_MS: u32 = 100;

/// Decode a quantity+resolution preset into milliseconds.
pub fn preset_to_ms(preset: u8) -> u32 {
    let count = u32::from(preset & COUNT_MASK);
    match preset & RES_MASK {
        RES_100_MS => 100 * count,
        RES_1_SEC => 1_000 * count,
        RES_10_SEC => 10_000 * count,
        _ => 600_000 * count,
    }
}

/// Sampling cadence state: `period_ms == 0` means suspended.
#[derive(Debug)]
pub struct CadenceController {
    period_ms: u32,
    mode_index: usize,
    last_sample: Option<Instant>,
}

impl CadenceController {
    /// Start in the first preset with a sample due immediately.
    pub fn new() -> Self {
        CadenceController {
            period_ms: preset_to_ms(PERIOD_PRESETS[0]),
            mode_index: 0,
            last_sample: None,
        }
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    pub fn mode_index(&self) -> usize {
        self.mode_index
    }

    pub fn is_suspended(&self) -> bool {
        self.period_ms == 0
    }

    /// Advance to the next preset cyclically and force a sample on the next
    /// tick.
    pub fn on_button_edge(&mut self) {
        self.mode_index = (self.mode_index + 1) % PERIOD_PRESETS.len();
        self.period_ms = preset_to_ms(PERIOD_PRESETS[self.mode_index]);
        self.last_sample = None;
    }

    /// Apply a serially configured period.
    ///
    /// Values below [`MIN_COMMAND_PERIOD_MS`] are rejected and leave the
    /// state untouched. An accepted value replaces the period directly
    /// without moving `mode_index` and without forcing a re-sample.
    /// Returns whether the value was accepted.
    pub fn on_command(&mut self, period_ms: u32) -> bool {
        if period_ms < MIN_COMMAND_PERIOD_MS {
            return false;
        }
        self.period_ms = period_ms;
        true
    }

    /// Whether the configured interval has passed since the last sample.
    ///
    /// Always false while suspended. On `true` the caller samples and must
    /// call [`mark_sampled`](Self::mark_sampled) before the next check.
    pub fn elapsed(&self, now: Instant) -> bool {
        if self.period_ms == 0 {
            return false;
        }
        match self.last_sample {
            None => true,
            Some(last) => {
                now.duration_since(last) >= Duration::from_millis(u64::from(self.period_ms))
            }
        }
    }

    pub fn mark_sampled(&mut self, now: Instant) {
        self.last_sample = Some(now);
    }
}

impl Default for CadenceController {
    fn default() -> Self {
        CadenceController::new()
    }
}
