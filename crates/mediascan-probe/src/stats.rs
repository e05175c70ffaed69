//! Per-frame statistic aggregation
//!
//! A full scan folds every value into a running [`StatAggregate`]. A bounded
//! scan only sees the head and tail of the file, so [`SampledStat`] also keeps
//! a fixed-capacity buffer of head samples and a ring of the most recent tail
//! samples and blends the two at finalize time.

use std::collections::VecDeque;

/// Capacity of the head sample buffer.
pub const HEAD_SAMPLE_CAP: usize = 1024;
/// Capacity of the tail sample ring.
pub const TAIL_RING_CAP: usize = 1024;

/// Which scan window a value was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanWindow {
    Head,
    Tail,
}

/// Running (sum, min, max, count). The first value seeds it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatAggregate {
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

impl StatAggregate {
    pub fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.count += 1;
    }

    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a f64>) -> Self {
        let mut agg = Self::default();
        for v in values {
            agg.push(*v);
        }
        agg
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Finalized statistic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatSummary {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

/// Weight given to tail samples, chosen from how many valid head samples
/// were seen.
/// Thresholds are tunables, not derived values.
pub fn blend_ratio(head_count: usize) -> f64 {
    match head_count {
        0..=7 => 0.0,
        8..=63 => 0.25,
        _ => 0.5,
    }
}

/// A statistic that can be finalized from either a full or a bounded scan.
#[derive(Debug, Clone, Default)]
pub struct SampledStat {
    running: StatAggregate,
    head: Vec<f64>,
    head_seen: u64,
    tail: VecDeque<f64>,
    tail_seen: u64,
}

impl SampledStat {
    pub fn record(&mut self, value: f64, window: ScanWindow) {
        if !value.is_finite() {
            return;
        }
        self.running.push(value);
        match window {
            ScanWindow::Head => {
                self.head_seen += 1;
                if self.head.len() < HEAD_SAMPLE_CAP {
                    self.head.push(value);
                }
            }
            ScanWindow::Tail => {
                self.tail_seen += 1;
                if self.tail.len() == TAIL_RING_CAP {
                    self.tail.pop_front();
                }
                self.tail.push_back(value);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.running.count == 0
    }

    /// Finalize. `windowed` selects the head/tail blend over the running
    /// aggregate. Returns `None` when the head window saw no valid value.
    pub fn finalize(&self, windowed: bool) -> Option<StatSummary> {
        if !windowed {
            let average = self.running.average()?;
            return Some(StatSummary {
                average,
                min: self.running.min,
                max: self.running.max,
                count: self.running.count,
            });
        }

        if self.head.is_empty() {
            return None;
        }
        let head = StatAggregate::from_values(&self.head);
        let tail = StatAggregate::from_values(&self.tail);
        let head_avg = head.average()?;
        let ratio = if tail.count == 0 {
            0.0
        } else {
            blend_ratio(self.head.len())
        };
        let average = match tail.average() {
            Some(tail_avg) if ratio > 0.0 => head_avg * (1.0 - ratio) + tail_avg * ratio,
            _ => head_avg,
        };

        Some(StatSummary {
            average,
            min: self.running.min,
            max: self.running.max,
            count: self.head_seen + self.tail_seen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_first_value_seeds() {
        let mut agg = StatAggregate::default();
        agg.push(-31.0);
        assert_eq!((agg.min, agg.max), (-31.0, -31.0));
        agg.push(-27.0);
        agg.push(-29.0);
        assert_eq!((agg.min, agg.max, agg.count), (-31.0, -27.0, 3));
        assert_eq!(agg.average(), Some(-29.0));
    }

    #[test]
    fn test_blend_ratio_thresholds() {
        assert_eq!(blend_ratio(0), 0.0);
        assert_eq!(blend_ratio(7), 0.0);
        assert_eq!(blend_ratio(8), 0.25);
        assert_eq!(blend_ratio(64), 0.5);
    }

    #[test]
    fn test_empty_head_yields_no_statistics() {
        let mut stat = SampledStat::default();
        stat.record(-20.0, ScanWindow::Tail);
        assert!(stat.finalize(true).is_none());
        assert!(stat.finalize(false).is_some());
    }

    #[test]
    fn test_sparse_head_uses_head_only() {
        let mut stat = SampledStat::default();
        for _ in 0..4 {
            stat.record(-10.0, ScanWindow::Head);
        }
        for _ in 0..100 {
            stat.record(-30.0, ScanWindow::Tail);
        }
        let s = stat.finalize(true).unwrap();
        assert_eq!(s.average, -10.0);
        assert_eq!(s.min, -30.0);
        assert_eq!(s.count, 104);
    }

    #[test]
    fn test_dense_head_blends_half() {
        let mut stat = SampledStat::default();
        for _ in 0..100 {
            stat.record(-10.0, ScanWindow::Head);
            stat.record(-30.0, ScanWindow::Tail);
        }
        assert_eq!(stat.finalize(true).unwrap().average, -20.0);
    }

    #[test]
    fn test_tail_ring_is_bounded() {
        let mut stat = SampledStat::default();
        stat.record(1.0, ScanWindow::Head);
        for i in 0..(TAIL_RING_CAP * 3) {
            stat.record(i as f64, ScanWindow::Tail);
        }
        assert_eq!(stat.tail.len(), TAIL_RING_CAP);
        assert_eq!(stat.tail_seen, (TAIL_RING_CAP * 3) as u64);
    }
}
