//! PES header decoding and per-PID unit reassembly

use tracing::trace;

/// Retained bytes per video PES unit
pub const VIDEO_UNIT_CAP: usize = 2 * 1024 * 1024;
/// Retained bytes per audio (and other) PES unit
pub const AUDIO_UNIT_CAP: usize = 256 * 1024;

/// Decoded PES packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// 90 kHz presentation timestamp, when present with valid marker bits
    pub pts: Option<u64>,
    /// Bytes before the elementary stream payload
    pub header_len: usize,
    /// Declared elementary stream bytes; `None` for an unbounded packet
    pub payload_len: Option<usize>,
}

/// Stream ids whose packets have no optional PES header
fn has_optional_header(stream_id: u8) -> bool {
    !matches!(stream_id, 0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF)
}

/// Decode a PES header at the front of `data`.
pub fn parse_pes_header(data: &[u8]) -> Option<PesHeader> {
    if data.len() < 6 || data[..3] != [0x00, 0x00, 0x01] {
        return None;
    }
    let stream_id = data[3];
    if stream_id < 0xBC {
        return None;
    }
    let packet_length = u16::from_be_bytes([data[4], data[5]]) as usize;

    let (header_len, pts) = if has_optional_header(stream_id) {
        if data.len() < 9 || data[6] & 0xC0 != 0x80 {
            return None;
        }
        let flags = data[7] >> 6;
        let header_len = 9 + data[8] as usize;
        let pts = match flags {
            0b10 | 0b11 => data.get(9..14).and_then(decode_timestamp),
            _ => None,
        };
        (header_len, pts)
    } else {
        (6, None)
    };

    let payload_len = match packet_length {
        0 => None,
        n => Some((n + 6).checked_sub(header_len)?),
    };
    Some(PesHeader {
        stream_id,
        pts,
        header_len,
        payload_len,
    })
}

/// Decode a 33-bit timestamp, rejecting bad marker bits.
fn decode_timestamp(b: &[u8]) -> Option<u64> {
    if b[0] & 0x01 == 0 || b[2] & 0x01 == 0 || b[4] & 0x01 == 0 {
        return None;
    }
    Some(
        (u64::from((b[0] >> 1) & 0x07) << 30)
            | (u64::from(b[1]) << 22)
            | (u64::from(b[2] >> 1) << 15)
            | (u64::from(b[3]) << 7)
            | u64::from(b[4] >> 1),
    )
}

/// A reassembled PES payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUnit {
    pub data: Vec<u8>,
    /// Bytes were dropped: the retention cap was hit or the unit was cut off
    pub truncated: bool,
}

#[derive(Debug)]
struct PendingUnit {
    data: Vec<u8>,
    remaining: Option<usize>,
    truncated: bool,
}

impl PendingUnit {
    fn new(remaining: Option<usize>) -> Self {
        Self {
            data: Vec::new(),
            remaining,
            truncated: false,
        }
    }

    fn finish(self) -> CompletedUnit {
        CompletedUnit {
            truncated: self.truncated || self.remaining.is_some_and(|r| r > 0),
            data: self.data,
        }
    }
}

/// Reassembles the PES units of one PID.
#[derive(Debug)]
pub struct PesAccumulator {
    max_retained: usize,
    current: Option<PendingUnit>,
}

impl PesAccumulator {
    pub fn new(max_retained: usize) -> Self {
        Self {
            max_retained,
            current: None,
        }
    }

    /// Feed one transport packet payload. Returns the units it completed,
    /// oldest first.
    pub fn push(&mut self, payload: &[u8], payload_start: bool) -> Vec<CompletedUnit> {
        let mut done = Vec::new();
        if payload_start {
            if let Some(unit) = self.current.take() {
                done.push(unit.finish());
            }
            match parse_pes_header(payload) {
                Some(header) if header.header_len <= payload.len() => {
                    self.current = Some(PendingUnit::new(header.payload_len));
                    self.append(&payload[header.header_len..], &mut done);
                }
                _ => trace!(len = payload.len(), "invalid PES header, unit dropped"),
            }
        } else if self.current.is_some() {
            self.append(payload, &mut done);
        }
        done
    }

    /// Complete the unit in progress, if any.
    pub fn flush(&mut self) -> Option<CompletedUnit> {
        self.current
            .take()
            .map(PendingUnit::finish)
            .filter(|unit| !unit.data.is_empty())
    }

    /// Drop the unit in progress.
    pub fn reset(&mut self) {
        self.current = None;
    }

    fn append(&mut self, mut bytes: &[u8], done: &mut Vec<CompletedUnit>) {
        while let Some(unit) = self.current.as_mut() {
            let take = unit.remaining.map_or(bytes.len(), |r| r.min(bytes.len()));
            let room = self.max_retained.saturating_sub(unit.data.len());
            if take > room {
                unit.truncated = true;
            }
            unit.data.extend_from_slice(&bytes[..take.min(room)]);
            bytes = &bytes[take..];

            match unit.remaining.as_mut() {
                Some(r) => {
                    *r -= take;
                    if *r > 0 {
                        return;
                    }
                }
                None => return,
            }
            if let Some(unit) = self.current.take() {
                done.push(unit.finish());
            }
            if bytes.is_empty() || bytes.iter().all(|&b| b == 0xFF) {
                return;
            }
            trace!(len = bytes.len(), "PES spillover starts an unannounced unit");
            self.current = Some(PendingUnit::new(None));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
        [
            (prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 0x01,
            (ts >> 22) as u8,
            (((ts >> 15) as u8) << 1) | 0x01,
            (ts >> 7) as u8,
            ((ts as u8) << 1) | 0x01,
        ]
    }

    /// A PES packet with a PTS. `bounded` writes the real packet length,
    /// otherwise 0.
    pub(crate) fn pes_packet(stream_id: u8, pts: u64, payload: &[u8], bounded: bool) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x01, stream_id, 0, 0, 0x80, 0x80, 5];
        out.extend_from_slice(&encode_timestamp(0x2, pts));
        out.extend_from_slice(payload);
        if bounded {
            let len = (out.len() - 6) as u16;
            out[4..6].copy_from_slice(&len.to_be_bytes());
        }
        out
    }

    #[test]
    fn test_parse_header_with_pts() {
        let pes = pes_packet(0xE0, (1 << 32) + 12345, &[0xAA; 10], true);
        let header = parse_pes_header(&pes).unwrap();
        assert_eq!(header.stream_id, 0xE0);
        assert_eq!(header.pts, Some((1 << 32) + 12345));
        assert_eq!(header.header_len, 14);
        assert_eq!(header.payload_len, Some(10));
    }

    #[test]
    fn test_pts_with_dts_header() {
        let mut pes = vec![0x00, 0x00, 0x01, 0xE0, 0, 0, 0x80, 0xC0, 10];
        pes.extend_from_slice(&encode_timestamp(0x3, 7200));
        pes.extend_from_slice(&encode_timestamp(0x1, 3600));
        pes.extend_from_slice(&[0x55; 8]);
        let header = parse_pes_header(&pes).unwrap();
        assert_eq!(header.pts, Some(7200));
        assert_eq!(header.header_len, 19);
        assert_eq!(header.payload_len, None);
    }

    #[test]
    fn test_invalid_marker_bits_drop_pts() {
        let mut pes = pes_packet(0xC0, 90000, &[0; 4], false);
        pes[13] &= 0xFE;
        let header = parse_pes_header(&pes).unwrap();
        assert_eq!(header.pts, None);
        assert_eq!(header.payload_len, None);
    }

    #[test]
    fn test_unbounded_units_complete_on_next_start() {
        let mut acc = PesAccumulator::new(1024);
        assert!(acc.push(&pes_packet(0xE0, 0, &[1; 100], false), true).is_empty());
        assert!(acc.push(&[2; 50], false).is_empty());
        let done = acc.push(&pes_packet(0xE0, 3600, &[3; 10], false), true);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].data.len(), 150);
        assert!(!done[0].truncated);
        assert_eq!(acc.flush().map(|u| u.data.len()), Some(10));
    }

    #[test]
    fn test_bounded_unit_completes_and_spills() {
        let mut acc = PesAccumulator::new(1024);
        let mut payload = pes_packet(0xBD, 900, &[7; 20], true);
        payload.extend_from_slice(&[9; 30]);
        let done = acc.push(&payload, true);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].data, vec![7; 20]);

        let rest = acc.flush().unwrap();
        assert_eq!(rest.data, vec![9; 30]);
        assert!(!rest.truncated);
    }

    #[test]
    fn test_cap_truncates_without_aborting() {
        let mut acc = PesAccumulator::new(64);
        acc.push(&pes_packet(0xE0, 0, &[1; 100], false), true);
        acc.push(&[2; 100], false);
        let unit = acc.flush().unwrap();
        assert_eq!(unit.data.len(), 64);
        assert!(unit.truncated);
    }

    #[test]
    fn test_garbage_start_is_skipped() {
        let mut acc = PesAccumulator::new(64);
        assert!(acc.push(&[0x12; 184], true).is_empty());
        assert!(acc.push(&[0x34; 184], false).is_empty());
        assert!(acc.flush().is_none());
    }
}
