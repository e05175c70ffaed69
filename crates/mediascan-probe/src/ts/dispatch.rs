//! Routing reassembled payloads to frame parsers
//!
//! A [`StreamProbe`] owns one [`FrameParser`] and everything learned from
//! it for one elementary stream: the seeded facts, frame and duration
//! counters, and sampled per-frame statistics.

use std::collections::BTreeMap;

use tracing::trace;

use super::program_map::StreamBinding;
use crate::codec::{FrameParser, FrameRecord, FrameResult};
use crate::stats::{SampledStat, ScanWindow};
use crate::types::{FieldValue, StreamRecord};

/// One-byte steps tried after a failed parse before jumping to the next
/// candidate sync word.
pub const RESYNC_BUDGET: usize = 64;
/// Largest partial frame carried into the next payload.
pub const MAX_CARRY: usize = 16 * 1024;
/// A candidate sync this close to the end of a payload is carried, since
/// its header may be incomplete.
const MIN_HEADER: usize = 16;

#[derive(Debug, Clone)]
pub struct StreamProbe {
    parser: FrameParser,
    carry: Vec<u8>,
    facts: Option<StreamRecord>,
    key_params: bool,
    frames: u64,
    decoded_secs: f64,
    stats: BTreeMap<&'static str, SampledStat>,
    rejected: u64,
}

impl StreamProbe {
    pub fn new(parser: FrameParser) -> Self {
        Self {
            parser,
            carry: Vec::new(),
            facts: None,
            key_params: false,
            frames: 0,
            decoded_secs: 0.0,
            stats: BTreeMap::new(),
            rejected: 0,
        }
    }

    /// Probe for a bound stream, or `None` when no parser handles its format.
    pub fn for_binding(binding: &StreamBinding) -> Option<Self> {
        let mut parser = binding.format.parser()?;
        if let (FrameParser::Hevc(hevc), Some(dovi)) = (&mut parser, &binding.dovi) {
            hevc.set_dolby_vision_config(dovi.clone());
        }
        Some(Self::new(parser))
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Payloads or presumed frame starts the parser refused
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn key_params(&self) -> bool {
        self.key_params
    }

    pub fn facts(&self) -> Option<&StreamRecord> {
        self.facts.as_ref()
    }

    /// Presentation duration of one frame, from decoded durations or the
    /// signalled frame rate.
    pub fn frame_duration(&self) -> Option<f64> {
        if self.frames > 0 && self.decoded_secs > 0.0 {
            return Some(self.decoded_secs / self.frames as f64);
        }
        let rate = self.facts.as_ref()?.get("FrameRate")?.as_f64()?;
        (rate > 0.0).then(|| 1.0 / rate)
    }

    /// Feed one reassembled PES payload.
    pub fn feed(&mut self, data: &[u8], window: ScanWindow) {
        if self.parser.frame_aligned() {
            match self.parser.try_parse_frame(data, self.key_params) {
                FrameResult::Frame { record, .. } => self.absorb(record, window),
                _ => self.rejected += 1,
            }
            return;
        }

        let joined;
        let buf: &[u8] = if self.carry.is_empty() {
            data
        } else {
            let mut carried = std::mem::take(&mut self.carry);
            carried.extend_from_slice(data);
            joined = carried;
            &joined
        };

        let mut pos = 0;
        let mut synced = true;
        let mut budget = RESYNC_BUDGET;
        while pos < buf.len() {
            let rest = &buf[pos..];
            match self.parser.try_parse_frame(rest, self.key_params) {
                FrameResult::Frame { record, consumed } => {
                    let next = pos + consumed.max(1);
                    if self.followed_by_sync(&buf[next.min(buf.len())..]) {
                        self.absorb(record, window);
                        pos = next;
                        synced = true;
                        budget = RESYNC_BUDGET;
                        continue;
                    }
                    trace!(pos, "frame not followed by a sync word, rejected");
                }
                FrameResult::Truncated => {
                    if synced || !self.later_sync(&rest[1..]) {
                        if rest.len() <= MAX_CARRY {
                            self.carry = rest.to_vec();
                        }
                        return;
                    }
                }
                FrameResult::NotAFrame => {
                    if rest.len() < MIN_HEADER && self.parser.is_sync(rest) {
                        self.carry = rest.to_vec();
                        return;
                    }
                }
            }

            // resync
            if synced {
                self.rejected += 1;
                synced = false;
            }
            if budget > 0 {
                budget -= 1;
                pos += 1;
            } else {
                match self.parser.find_sync(&buf[pos + 1..]) {
                    Some(skip) => pos += 1 + skip,
                    None => return,
                }
            }
        }
    }

    /// Whether the bytes after a decoded frame can start another one. A
    /// tail shorter than the sync word cannot be judged and is accepted.
    fn followed_by_sync(&self, tail: &[u8]) -> bool {
        tail.len() < self.parser.sync_len() || self.parser.is_sync(tail)
    }

    /// Whether a decodable header starts anywhere in `bytes`.
    fn later_sync(&self, bytes: &[u8]) -> bool {
        let mut pos = 0;
        while let Some(skip) = self.parser.find_sync(&bytes[pos..]) {
            if self.parser.is_sync(&bytes[pos + skip..]) {
                return true;
            }
            pos += skip + 1;
            if pos >= bytes.len() {
                break;
            }
        }
        false
    }

    /// Feed a payload read only to recover sequence parameters. Frames and
    /// statistics are not counted.
    pub fn feed_recovery(&mut self, data: &[u8]) -> bool {
        if let FrameResult::Frame { record, .. } = self.parser.try_parse_frame(data, false) {
            if record.key_params {
                self.key_params = true;
                match self.facts.as_mut() {
                    Some(facts) => facts.merge_missing(&record.facts),
                    None => self.facts = Some(record.facts),
                }
            }
        }
        self.key_params
    }

    /// The window ended; bytes carried across it belong to nothing.
    pub fn finish_window(&mut self) {
        self.carry.clear();
    }

    fn absorb(&mut self, record: FrameRecord, window: ScanWindow) {
        self.frames += record.frames;
        if let Some(secs) = record.duration_secs {
            self.decoded_secs += secs;
        }
        if record.key_params {
            self.key_params = true;
        }
        for (name, value) in record.metrics {
            self.stats.entry(name).or_default().record(value, window);
        }
        match self.facts.as_mut() {
            Some(facts) => facts.merge_missing(&record.facts),
            None => self.facts = Some(record.facts),
        }
    }

    /// Write `<metric>_Average/_Minimum/_Maximum/_Count` fields.
    pub fn write_statistics(&self, record: &mut StreamRecord, windowed: bool) {
        for (name, stat) in &self.stats {
            let Some(summary) = stat.finalize(windowed) else {
                continue;
            };
            record.set(&format!("{}_Average", name), FieldValue::decimal(summary.average, 2));
            record.set(&format!("{}_Minimum", name), stat_value(summary.min));
            record.set(&format!("{}_Maximum", name), stat_value(summary.max));
            record.set(&format!("{}_Count", name), summary.count);
        }
    }
}

fn stat_value(value: f64) -> FieldValue {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        FieldValue::Int(value as i64)
    } else {
        FieldValue::decimal(value, 2)
    }
}
