//! Full versus bounded head+tail scanning
//!
//! The planner is a small state machine driven by the demuxer:
//!
//! ```text
//! Scanning --(head limit reached or PCR settled)--> HeadWindowClosing
//! HeadWindowClosing --(seek performed)--> TailWindowActive
//! Scanning | TailWindowActive --(end of data)--> Done
//! ```
//!
//! Files too small for two disjoint windows, and scans at or above the
//! full-scan threshold, stay in `Scanning` until the end of the file.

use tracing::debug;

use crate::options::ProbeOptions;
use crate::stats::ScanWindow;

/// Elapsed PCR span after which the head window may close early.
pub const PCR_SETTLE_SECS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Scanning,
    HeadWindowClosing,
    TailWindowActive,
    Done,
}

/// What the demuxer should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep {
    Continue,
    /// Close the head window and resume at `[start, end)`
    SeekTo { start: u64, end: u64 },
    Finish,
}

#[derive(Debug, Clone)]
pub struct ScanPlanner {
    phase: ScanPhase,
    file_size: u64,
    data_start: u64,
    head_limit: u64,
    may_window: bool,
    head_end: Option<u64>,
    tail_start: Option<u64>,
}

impl ScanPlanner {
    /// `data_start` is the offset of the first packet.
    pub fn new(file_size: u64, data_start: u64, options: &ProbeOptions) -> Self {
        let window = options.head_window();
        let may_window = !options.full_scan()
            && file_size.saturating_sub(data_start) > options.head_window_cap.saturating_mul(2);
        Self {
            phase: ScanPhase::Scanning,
            file_size,
            data_start,
            head_limit: data_start.saturating_add(window),
            may_window,
            head_end: None,
            tail_start: None,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Window new observations belong to.
    pub fn window(&self) -> ScanWindow {
        match self.phase {
            ScanPhase::TailWindowActive => ScanWindow::Tail,
            ScanPhase::Done if self.tail_start.is_some() => ScanWindow::Tail,
            _ => ScanWindow::Head,
        }
    }

    /// Whether the scan skipped the middle of the file.
    pub fn windowed(&self) -> bool {
        self.tail_start.is_some()
    }

    /// The skipped byte range `[head_end, tail_start)` of a windowed scan.
    pub fn skipped_range(&self) -> Option<(u64, u64)> {
        Some((self.head_end?, self.tail_start?))
    }

    /// Report the offset reached and whether every PCR PID has
    /// accumulated more than [`PCR_SETTLE_SECS`].
    pub fn on_progress(&mut self, offset: u64, pcr_settled: bool) -> ScanStep {
        match self.phase {
            ScanPhase::Scanning if self.may_window => {
                let settled = pcr_settled && offset < self.head_limit;
                if offset < self.head_limit && !settled {
                    return ScanStep::Continue;
                }
                // a resync jump can carry the head past its limit; the tail
                // never starts before the head ended
                let head_len = offset - self.data_start;
                let start = self.file_size.saturating_sub(head_len).max(offset);
                debug!(
                    head_end = offset,
                    tail_start = start,
                    early = settled,
                    "closing head window"
                );
                self.phase = ScanPhase::HeadWindowClosing;
                self.head_end = Some(offset);
                ScanStep::SeekTo {
                    start,
                    end: self.file_size,
                }
            }
            ScanPhase::Done => ScanStep::Finish,
            _ => ScanStep::Continue,
        }
    }

    /// The demuxer has flushed the head window and seeked to `start`.
    pub fn tail_started(&mut self, start: u64) {
        if self.phase == ScanPhase::HeadWindowClosing {
            self.phase = ScanPhase::TailWindowActive;
            self.tail_start = Some(start);
        }
    }

    /// The scanner ran out of data in the current window (or the scan was
    /// cancelled).
    pub fn on_window_end(&mut self) -> ScanStep {
        self.phase = ScanPhase::Done;
        ScanStep::Finish
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn options(speed: f32) -> ProbeOptions {
        ProbeOptions::default()
            .with_parse_speed(speed)
            .with_head_window_cap(8 * MIB)
    }

    #[test]
    fn test_small_file_scans_sequentially() {
        let mut planner = ScanPlanner::new(10 * MIB, 0, &options(0.5));
        assert_eq!(planner.on_progress(9 * MIB, true), ScanStep::Continue);
        assert_eq!(planner.on_window_end(), ScanStep::Finish);
        assert!(!planner.windowed());
        assert_eq!(planner.window(), ScanWindow::Head);
    }

    #[test]
    fn test_head_then_tail() {
        let mut planner = ScanPlanner::new(100 * MIB, 0, &options(0.5));
        assert_eq!(planner.on_progress(MIB, false), ScanStep::Continue);
        assert_eq!(
            planner.on_progress(8 * MIB, false),
            ScanStep::SeekTo {
                start: 92 * MIB,
                end: 100 * MIB
            }
        );
        assert_eq!(planner.phase(), ScanPhase::HeadWindowClosing);
        planner.tail_started(92 * MIB);
        assert_eq!(planner.phase(), ScanPhase::TailWindowActive);
        assert_eq!(planner.window(), ScanWindow::Tail);
        assert_eq!(planner.on_progress(95 * MIB, true), ScanStep::Continue);
        assert_eq!(planner.on_window_end(), ScanStep::Finish);
        assert_eq!(planner.skipped_range(), Some((8 * MIB, 92 * MIB)));
        assert!(planner.windowed());
    }

    #[test]
    fn test_settled_pcr_shrinks_head_window() {
        let mut planner = ScanPlanner::new(100 * MIB, 192, &options(0.5));
        let step = planner.on_progress(192 + 3 * MIB, true);
        assert_eq!(
            step,
            ScanStep::SeekTo {
                start: 97 * MIB,
                end: 100 * MIB
            }
        );
    }

    #[test]
    fn test_full_scan_never_windows() {
        let mut planner = ScanPlanner::new(1000 * MIB, 0, &options(1.0));
        assert_eq!(planner.on_progress(500 * MIB, true), ScanStep::Continue);
        assert_eq!(planner.window(), ScanWindow::Head);
    }

    #[test]
    fn test_low_speed_uses_smaller_window() {
        let mut planner = ScanPlanner::new(100 * MIB, 0, &options(0.0));
        assert!(matches!(
            planner.on_progress(2 * MIB, false),
            ScanStep::SeekTo { start, .. } if start == 98 * MIB
        ));
    }

    #[test]
    fn test_window_test_uses_nominal_cap() {
        // 40 MiB against a 64 MiB cap scans to the end even at speed 0
        let options = ProbeOptions::default()
            .with_parse_speed(0.0)
            .with_head_window_cap(64 * MIB);
        let mut planner = ScanPlanner::new(40 * MIB, 0, &options);
        assert_eq!(planner.on_progress(17 * MIB, true), ScanStep::Continue);
        assert_eq!(planner.on_progress(39 * MIB, false), ScanStep::Continue);
        assert_eq!(planner.on_window_end(), ScanStep::Finish);
        assert!(!planner.windowed());
    }

    #[test]
    fn test_overshooting_head_never_overlaps_tail() {
        let mut planner = ScanPlanner::new(17 * MIB, 0, &options(0.5));
        let step = planner.on_progress(10 * MIB, false);
        assert_eq!(
            step,
            ScanStep::SeekTo {
                start: 10 * MIB,
                end: 17 * MIB
            }
        );
        planner.tail_started(10 * MIB);
        let (head_end, tail_start) = planner.skipped_range().unwrap();
        assert!(tail_start >= head_end);
    }
}
