//! Discontinuity-aware PTS and PCR duration tracking

use tracing::trace;

/// PTS clock rate
pub const PTS_HZ: u64 = 90_000;
/// PCR clock rate
pub const PCR_HZ: u64 = 27_000_000;

const PTS_MASK: u64 = (1 << 33) - 1;
/// Backward PTS steps up to this size are frame reordering, not a reset.
pub const PTS_REORDER_TOLERANCE: u64 = 2 * PTS_HZ;
/// Forward PTS steps beyond this are treated as backward (wrapped) steps.
const PTS_FORWARD_LIMIT: u64 = 1 << 32;

const PCR_MODULUS: u64 = (1 << 33) * 300;
/// A gap between consecutive PCRs larger than this opens a new segment.
const PCR_MAX_GAP: u64 = 10 * PCR_HZ;
/// PCR precision over a span: 500 ns at each end.
const PCR_SPAN_JITTER_TICKS: u64 = PCR_HZ / 1_000_000;

/// Presentation time span of one PID.
///
/// Timestamps are unwrapped across the 33-bit boundary. Small backward
/// steps are reordering; a larger backward step closes the current segment
/// and starts a new one, and the total duration is the sum of segments.
#[derive(Debug, Clone, Default)]
pub struct PtsTracker {
    first: Option<u64>,
    last_raw: u64,
    last: i64,
    seg_min: i64,
    seg_max: i64,
    completed: Vec<u64>,
}

impl PtsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a 90 kHz timestamp. Returns true when it started a new segment.
    pub fn observe(&mut self, pts: u64) -> bool {
        let raw = pts & PTS_MASK;
        if self.first.is_none() {
            self.first = Some(raw);
            self.start_segment(raw);
            return false;
        }

        let forward = raw.wrapping_sub(self.last_raw) & PTS_MASK;
        let backward = self.last_raw.wrapping_sub(raw) & PTS_MASK;
        self.last_raw = raw;
        if forward <= PTS_FORWARD_LIMIT {
            self.last += forward as i64;
        } else if backward <= PTS_REORDER_TOLERANCE {
            self.last -= backward as i64;
        } else {
            trace!(backward, "PTS discontinuity, new segment");
            self.completed.push(self.segment_span());
            self.start_segment(raw);
            return true;
        }
        self.seg_min = self.seg_min.min(self.last);
        self.seg_max = self.seg_max.max(self.last);
        false
    }

    fn start_segment(&mut self, raw: u64) {
        self.last_raw = raw;
        self.last = raw as i64;
        self.seg_min = self.last;
        self.seg_max = self.last;
    }

    fn segment_span(&self) -> u64 {
        (self.seg_max - self.seg_min) as u64
    }

    pub fn first(&self) -> Option<u64> {
        self.first
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Number of segments seen (resets + 1), zero when empty.
    pub fn segments(&self) -> usize {
        if self.first.is_none() {
            0
        } else {
            self.completed.len() + 1
        }
    }

    /// Durations of the closed segments followed by the current one.
    pub fn segment_durations(&self) -> Vec<u64> {
        let mut spans = self.completed.clone();
        if self.first.is_some() {
            spans.push(self.segment_span());
        }
        spans
    }

    /// Total span in 90 kHz ticks over all segments.
    pub fn duration_ticks(&self) -> u64 {
        self.completed.iter().sum::<u64>() + self.first.map_or(0, |_| self.segment_span())
    }
}

/// Elapsed clock and byte span of one PCR-carrying PID.
#[derive(Debug, Clone, Default)]
pub struct PcrSpan {
    started: bool,
    last_raw: u64,
    /// Unwrapped 27 MHz time of the last PCR
    last: u64,
    last_offset: u64,
    seg_start: u64,
    seg_start_offset: u64,
    completed_ticks: u64,
    completed_bytes: u64,
    seek_pending: bool,
}

impl PcrSpan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a PCR carried by the packet at byte `offset`.
    pub fn observe(&mut self, pcr: u64, offset: u64, discontinuity: bool) {
        let raw = pcr % PCR_MODULUS;
        if !self.started {
            self.started = true;
            self.last_raw = raw;
            self.last = raw;
            self.last_offset = offset;
            self.seg_start = raw;
            self.seg_start_offset = offset;
            return;
        }

        let delta = (raw + PCR_MODULUS - self.last_raw) % PCR_MODULUS;
        let accept = if std::mem::take(&mut self.seek_pending) {
            delta < PCR_MODULUS / 2
        } else {
            !discontinuity && delta <= PCR_MAX_GAP
        };
        if accept && offset >= self.last_offset {
            self.last += delta;
        } else {
            trace!(delta, discontinuity, "PCR discontinuity, new segment");
            self.completed_ticks += self.last - self.seg_start;
            self.completed_bytes += self.last_offset - self.seg_start_offset;
            self.last = raw;
            self.seg_start = raw;
            self.seg_start_offset = offset;
        }
        self.last_raw = raw;
        self.last_offset = offset;
    }

    /// The next PCR follows a deliberate seek; accept the jump to it as
    /// elapsed time.
    pub fn note_seek(&mut self) {
        if self.started {
            self.seek_pending = true;
        }
    }

    /// Elapsed 27 MHz ticks over all segments.
    pub fn elapsed_ticks(&self) -> u64 {
        self.completed_ticks + (self.last - self.seg_start)
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_ticks() as f64 / PCR_HZ as f64
    }

    /// Bytes between the first and last PCR of each segment.
    pub fn covered_bytes(&self) -> u64 {
        self.completed_bytes + (self.last_offset - self.seg_start_offset)
    }

    /// Bits per second over the covered span.
    pub fn bitrate(&self) -> Option<f64> {
        let ticks = self.elapsed_ticks();
        (ticks > 0).then(|| self.covered_bytes() as f64 * 8.0 * PCR_HZ as f64 / ticks as f64)
    }

    /// Bitrate bounds given the PCR precision at both ends of the span.
    pub fn bitrate_bounds(&self) -> Option<(f64, f64)> {
        let ticks = self.elapsed_ticks();
        let jitter = PCR_SPAN_JITTER_TICKS;
        if ticks <= jitter {
            return None;
        }
        let bits = self.covered_bytes() as f64 * 8.0 * PCR_HZ as f64;
        Some((
            bits / (ticks + jitter) as f64,
            bits / (ticks - jitter) as f64,
        ))
    }
}
