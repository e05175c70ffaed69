//! Transport packet framing and the sequential packet scanner

use std::io::{Read, Seek, SeekFrom};

use tracing::trace;

use crate::error::Result;

pub const SYNC_BYTE: u8 = 0x47;
pub const TS_PACKET_SIZE: usize = 188;
pub const BDAV_PACKET_SIZE: usize = 192;

pub const PID_PAT: u16 = 0x0000;
pub const PID_SDT: u16 = 0x0011;
pub const PID_NULL: u16 = 0x1FFF;

/// How far into a source alignment is searched for.
pub const ALIGNMENT_PROBE: usize = 1024 * 1024;
/// Consecutive sync bytes required to accept an alignment.
const ALIGNMENT_SYNCS: usize = 5;
/// Packets read from the source per refill.
const READ_PACKETS: usize = 1024;

/// Packet framing of a transport stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFormat {
    /// Plain 188-byte MPEG-TS packets
    Ts,
    /// 192-byte BDAV/M2TS packets: 4-byte arrival timestamp + TS packet
    Bdav,
}

impl PacketFormat {
    pub fn packet_size(self) -> usize {
        match self {
            PacketFormat::Ts => TS_PACKET_SIZE,
            PacketFormat::Bdav => BDAV_PACKET_SIZE,
        }
    }

    /// Offset of the sync byte within a packet.
    pub fn sync_offset(self) -> usize {
        match self {
            PacketFormat::Ts => 0,
            PacketFormat::Bdav => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketFormat::Ts => "MPEG-TS",
            PacketFormat::Bdav => "BDAV",
        }
    }
}

/// Adaptation field contents the scanner cares about
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptationField {
    pub discontinuity: bool,
    pub random_access: bool,
    /// Program clock reference in 27 MHz ticks (base × 300 + extension)
    pub pcr: Option<u64>,
}

/// A decoded transport packet header plus its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPacket<'a> {
    pub pid: u16,
    pub payload_start: bool,
    pub transport_error: bool,
    pub continuity_counter: u8,
    pub adaptation: Option<AdaptationField>,
    pub payload: &'a [u8],
}

/// Parse a 188-byte transport packet starting at its sync byte.
///
/// Returns `None` for a bad sync byte, reserved adaptation control or an
/// adaptation field longer than the packet.
pub fn parse_packet(data: &[u8]) -> Option<TransportPacket<'_>> {
    if data.len() < TS_PACKET_SIZE || data[0] != SYNC_BYTE {
        return None;
    }
    let data = &data[..TS_PACKET_SIZE];
    let transport_error = data[1] & 0x80 != 0;
    let payload_start = data[1] & 0x40 != 0;
    let pid = (u16::from(data[1] & 0x1F) << 8) | u16::from(data[2]);
    let control = (data[3] >> 4) & 0x03;
    let continuity_counter = data[3] & 0x0F;

    let (adaptation, payload_offset) = match control {
        0 => return None,
        1 => (None, 4),
        _ => {
            let len = data[4] as usize;
            if len > 183 {
                return None;
            }
            let field = parse_adaptation(&data[5..5 + len]);
            (Some(field), 5 + len)
        }
    };
    let payload = if control & 0x01 != 0 {
        &data[payload_offset.min(TS_PACKET_SIZE)..]
    } else {
        &[][..]
    };

    Some(TransportPacket {
        pid,
        payload_start,
        transport_error,
        continuity_counter,
        adaptation,
        payload,
    })
}

fn parse_adaptation(field: &[u8]) -> AdaptationField {
    let Some(&flags) = field.first() else {
        return AdaptationField::default();
    };
    let pcr = if flags & 0x10 != 0 && field.len() >= 7 {
        let b = &field[1..7];
        let base = (u64::from(b[0]) << 25)
            | (u64::from(b[1]) << 17)
            | (u64::from(b[2]) << 9)
            | (u64::from(b[3]) << 1)
            | (u64::from(b[4]) >> 7);
        let extension = (u64::from(b[4] & 0x01) << 8) | u64::from(b[5]);
        Some(base * 300 + extension)
    } else {
        None
    };
    AdaptationField {
        discontinuity: flags & 0x80 != 0,
        random_access: flags & 0x40 != 0,
        pcr,
    }
}

/// Locate packet alignment: the first offset at which [`ALIGNMENT_SYNCS`]
/// sync bytes follow each other at a fixed packet stride.
///
/// Returns the framing and the byte offset of the first packet (for BDAV,
/// the offset of its arrival timestamp).
pub fn find_alignment(data: &[u8]) -> Option<(PacketFormat, usize)> {
    let limit = data.len().min(ALIGNMENT_PROBE);
    let syncs_at = |pos: usize, stride: usize| {
        (0..ALIGNMENT_SYNCS).all(|k| data.get(pos + k * stride) == Some(&SYNC_BYTE))
    };
    (0..limit).filter(|&pos| data[pos] == SYNC_BYTE).find_map(|pos| {
        if pos >= 4 && syncs_at(pos, BDAV_PACKET_SIZE) {
            Some((PacketFormat::Bdav, pos - 4))
        } else if syncs_at(pos, TS_PACKET_SIZE) {
            Some((PacketFormat::Ts, pos))
        } else {
            None
        }
    })
}

/// Sequential reader of fixed-size packets over a byte window of a source.
///
/// Packets with a bad sync byte or an undecodable header are counted and
/// skipped; on a lost sync the scanner searches forward for the next
/// position where two consecutive packets line up.
pub struct PacketScanner<R> {
    reader: R,
    format: PacketFormat,
    /// Offset of the first packet in the source
    base: u64,
    buf: Vec<u8>,
    pos: usize,
    /// Source offset of `buf[0]`
    buf_offset: u64,
    /// Source offset the current window ends at
    window_end: u64,
    /// Source offset the next read will come from
    read_offset: u64,
    valid: u64,
    invalid: u64,
}

impl<R: Read + Seek> PacketScanner<R> {
    pub fn new(mut reader: R, format: PacketFormat, base: u64, end: u64) -> Result<Self> {
        reader.seek(SeekFrom::Start(base))?;
        Ok(Self {
            reader,
            format,
            base,
            buf: Vec::with_capacity(format.packet_size() * READ_PACKETS),
            pos: 0,
            buf_offset: base,
            window_end: end,
            read_offset: base,
            valid: 0,
            invalid: 0,
        })
    }

    pub fn format(&self) -> PacketFormat {
        self.format
    }

    /// Packets decoded so far across all windows.
    pub fn valid_packets(&self) -> u64 {
        self.valid
    }

    pub fn invalid_packets(&self) -> u64 {
        self.invalid
    }

    /// Source offset of the next packet.
    pub fn position(&self) -> u64 {
        self.buf_offset + self.pos as u64
    }

    /// Restrict scanning to `[start, end)`. `start` is rounded up to the
    /// packet grid established at construction.
    pub fn seek_window(&mut self, start: u64, end: u64) -> Result<()> {
        let size = self.format.packet_size() as u64;
        let start = start.max(self.base);
        let aligned = self.base + (start - self.base).div_ceil(size) * size;
        self.reader.seek(SeekFrom::Start(aligned))?;
        self.buf.clear();
        self.pos = 0;
        self.buf_offset = aligned;
        self.read_offset = aligned;
        self.window_end = end;
        Ok(())
    }

    /// Consume the source, handing back the reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Next decodable packet in the window, with its source offset.
    pub fn next_packet(&mut self) -> Result<Option<(u64, TransportPacket<'_>)>> {
        let size = self.format.packet_size();
        let sync = self.format.sync_offset();
        loop {
            if !self.fill(size)? {
                return Ok(None);
            }
            let start = self.pos;
            let ts = &self.buf[start + sync..start + size];
            if ts[0] != SYNC_BYTE {
                self.invalid += 1;
                self.resync(size, sync);
                continue;
            }
            if parse_packet(ts).is_none() {
                self.invalid += 1;
                self.pos += size;
                continue;
            }
            break;
        }
        let start = self.pos;
        self.pos += size;
        self.valid += 1;
        let offset = self.buf_offset + start as u64;
        Ok(parse_packet(&self.buf[start + sync..start + size]).map(|packet| (offset, packet)))
    }

    /// Ensure at least `need` bytes are buffered from `pos`. Returns false at
    /// the end of the window.
    fn fill(&mut self, need: usize) -> Result<bool> {
        if self.buf.len() - self.pos >= need {
            return Ok(true);
        }
        self.buf.drain(..self.pos);
        self.buf_offset += self.pos as u64;
        self.pos = 0;

        let want = (need * READ_PACKETS) as u64;
        let room = self.window_end.saturating_sub(self.read_offset).min(want) as usize;
        if room > 0 {
            let old_len = self.buf.len();
            self.buf.resize(old_len + room, 0);
            let mut filled = 0;
            while filled < room {
                let n = self.reader.read(&mut self.buf[old_len + filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            self.buf.truncate(old_len + filled);
            self.read_offset += filled as u64;
        }
        Ok(self.buf.len() >= need)
    }

    /// Skip forward to the next offset where this and the following packet
    /// both carry a sync byte, or as far as the buffered data allows.
    fn resync(&mut self, size: usize, sync: usize) {
        let skipped_from = self.position();
        let mut candidate = self.pos + 1;
        while candidate + sync < self.buf.len() {
            let here = self.buf[candidate + sync] == SYNC_BYTE;
            let next = self
                .buf
                .get(candidate + size + sync)
                .map_or(true, |&b| b == SYNC_BYTE);
            if here && next {
                break;
            }
            candidate += 1;
        }
        self.pos = candidate.min(self.buf.len());
        trace!(
            from = skipped_from,
            to = self.position(),
            "lost packet sync, skipped bytes"
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// A payload-only packet for `pid` filled with `fill`.
    pub(crate) fn packet(pid: u16, pusi: bool, cc: u8, fill: u8) -> Vec<u8> {
        let mut p = vec![fill; TS_PACKET_SIZE];
        p[0] = SYNC_BYTE;
        p[1] = (if pusi { 0x40 } else { 0 }) | (pid >> 8) as u8;
        p[2] = pid as u8;
        p[3] = 0x10 | (cc & 0x0F);
        p
    }

    fn pcr_packet(pid: u16, pcr: u64) -> Vec<u8> {
        let mut p = vec![0xFF; TS_PACKET_SIZE];
        p[0] = SYNC_BYTE;
        p[1] = (pid >> 8) as u8;
        p[2] = pid as u8;
        p[3] = 0x20;
        p[4] = 183;
        p[5] = 0x10;
        let base = pcr / 300;
        let ext = pcr % 300;
        p[6] = (base >> 25) as u8;
        p[7] = (base >> 17) as u8;
        p[8] = (base >> 9) as u8;
        p[9] = (base >> 1) as u8;
        p[10] = (((base & 1) << 7) as u8) | 0x7E | ((ext >> 8) as u8 & 0x01);
        p[11] = ext as u8;
        p
    }

    #[test]
    fn test_parse_header_and_pcr() {
        let data = pcr_packet(0x100, 27_000_000 * 5 + 123);
        let with_pcr = parse_packet(&data).unwrap();
        assert_eq!(with_pcr.pid, 0x100);
        assert!(with_pcr.payload.is_empty());
        assert_eq!(with_pcr.adaptation.unwrap().pcr, Some(27_000_000 * 5 + 123));

        let data = packet(0x1FF, true, 7, 0xAA);
        let plain = parse_packet(&data).unwrap();
        assert!(plain.payload_start);
        assert_eq!(plain.continuity_counter, 7);
        assert_eq!(plain.payload.len(), 184);
    }

    #[test]
    fn test_find_alignment() {
        let mut ts = vec![0u8; 13];
        for i in 0..6 {
            ts.extend(packet(0x100, false, i, 0));
        }
        assert_eq!(find_alignment(&ts), Some((PacketFormat::Ts, 13)));

        let mut bdav = Vec::new();
        for i in 0..6 {
            bdav.extend_from_slice(&[0x00, 0x00, 0x12, 0x34]);
            bdav.extend(packet(0x1011, false, i, 0));
        }
        assert_eq!(find_alignment(&bdav), Some((PacketFormat::Bdav, 0)));

        assert_eq!(find_alignment(&[0x47; 100]), None);
    }

    #[test]
    fn test_scanner_skips_garbage() {
        let mut data = Vec::new();
        for i in 0..3 {
            data.extend(packet(0x100, false, i, 0));
        }
        data.extend_from_slice(&[0x00; 50]);
        for i in 3..6 {
            data.extend(packet(0x100, false, i, 0));
        }
        let len = data.len() as u64;
        let mut scanner = PacketScanner::new(Cursor::new(data), PacketFormat::Ts, 0, len).unwrap();
        let mut counters = Vec::new();
        while let Some((_, packet)) = scanner.next_packet().unwrap() {
            counters.push(packet.continuity_counter);
        }
        assert_eq!(counters, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(scanner.valid_packets(), 6);
        assert_eq!(scanner.invalid_packets(), 1);
    }

    #[test]
    fn test_seek_window() {
        let mut data = Vec::new();
        for i in 0..10 {
            data.extend(packet(0x100, false, i, 0));
        }
        let len = data.len() as u64;
        let mut scanner = PacketScanner::new(Cursor::new(data), PacketFormat::Ts, 0, len).unwrap();
        scanner.seek_window(7 * 188 - 20, len).unwrap();
        let (offset, packet) = scanner.next_packet().unwrap().unwrap();
        assert_eq!(offset, 7 * 188);
        assert_eq!(packet.continuity_counter, 7);
    }
}
