//! Probe options

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default nominal head window (64 MiB).
pub const DEFAULT_HEAD_WINDOW_CAP: u64 = 64 * 1024 * 1024;

/// Knobs controlling how much of a file is read.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Parse thoroughness, 0.0 (bounded/fast) to 1.0 (exhaustive)
    pub parse_speed: f32,
    /// Nominal head window size in bytes
    pub head_window_cap: u64,
    /// `parse_speed` at or above which the whole file is scanned
    pub full_scan_threshold: f32,
    /// Polled between packets; a set flag finalises with what was seen
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            parse_speed: 0.5,
            head_window_cap: DEFAULT_HEAD_WINDOW_CAP,
            full_scan_threshold: 1.0,
            cancel: None,
        }
    }
}

impl ProbeOptions {
    pub fn with_parse_speed(mut self, speed: f32) -> Self {
        self.parse_speed = if speed.is_nan() {
            0.0
        } else {
            speed.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_head_window_cap(mut self, cap: u64) -> Self {
        self.head_window_cap = cap.max(1);
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Effective head window: `cap × min(1, 0.25 + 1.5 × parse_speed)`.
    pub fn head_window(&self) -> u64 {
        let factor = (0.25 + 1.5 * self.parse_speed.clamp(0.0, 1.0) as f64).min(1.0);
        ((self.head_window_cap as f64 * factor) as u64).max(1)
    }

    /// Whether statistics must come from the whole file.
    pub fn full_scan(&self) -> bool {
        self.parse_speed >= self.full_scan_threshold
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}
