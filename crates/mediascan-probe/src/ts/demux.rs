//! The transport stream scan driver
//!
//! One sequential pass over the head window, an optional pass over a tail
//! window of the same size, and an optional targeted pass over the skipped
//! middle for video PIDs whose sequence parameters were never seen.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, trace};

use super::clock::PcrSpan;
use super::output::{self, ScanTotals};
use super::packet::{
    find_alignment, PacketFormat, PacketScanner, TransportPacket, ALIGNMENT_PROBE, PID_NULL,
    PID_PAT, PID_SDT,
};
use super::pes::parse_pes_header;
use super::planner::{ScanPlanner, ScanStep, PCR_SETTLE_SECS};
use super::program_map::{sniff, ProgramMap, StreamBinding};
use super::psi::{parse_pat, parse_pmt, parse_sdt};
use super::section::SectionAssembler;
use super::stream::ElementaryStream;
use crate::error::{ProbeError, Result};
use crate::options::ProbeOptions;
use crate::stats::ScanWindow;
use crate::types::MediaInfo;

/// Read up to `limit` bytes from the start of the source.
fn read_prefix<R: Read + Seek>(reader: &mut R, limit: usize) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(0))?;
    let mut prefix = Vec::with_capacity(limit);
    reader.by_ref().take(limit as u64).read_to_end(&mut prefix)?;
    Ok(prefix)
}

/// Detect packet framing at the start of a source.
pub fn detect_format<R: Read + Seek>(reader: &mut R) -> Result<Option<(PacketFormat, u64)>> {
    let prefix = read_prefix(reader, ALIGNMENT_PROBE + 5 * 192)?;
    Ok(find_alignment(&prefix).map(|(format, offset)| (format, offset as u64)))
}

/// Demultiplexing state shared by all scan windows.
#[derive(Debug)]
struct Demuxer {
    programs: ProgramMap,
    sections: HashMap<u16, SectionAssembler>,
    streams: Vec<ElementaryStream>,
    by_pid: HashMap<u16, usize>,
    pcr: BTreeMap<u16, PcrSpan>,
}

impl Demuxer {
    fn new() -> Self {
        Self {
            programs: ProgramMap::new(),
            sections: HashMap::new(),
            streams: Vec::new(),
            by_pid: HashMap::new(),
            pcr: BTreeMap::new(),
        }
    }

    fn handle_packet(&mut self, offset: u64, packet: &TransportPacket<'_>, window: ScanWindow) {
        if packet.transport_error {
            trace!(pid = packet.pid, offset, "transport error indicator set");
            return;
        }
        if let Some(adaptation) = &packet.adaptation {
            if let Some(pcr) = adaptation.pcr {
                self.pcr
                    .entry(packet.pid)
                    .or_default()
                    .observe(pcr, offset, adaptation.discontinuity);
            }
        }
        if packet.payload.is_empty() {
            return;
        }

        match packet.pid {
            PID_PAT | PID_SDT => self.handle_section(packet),
            pid if self.programs.is_pmt_pid(pid) => self.handle_section(packet),
            PID_NULL => {}
            pid if pid < 0x20 => {}
            pid => self.handle_pes(pid, packet, window),
        }
    }

    fn handle_section(&mut self, packet: &TransportPacket<'_>) {
        let pid = packet.pid;
        let sections = self.sections.entry(pid).or_default().push(
            packet.payload,
            packet.payload_start,
            packet.continuity_counter,
        );
        for section in sections {
            match pid {
                PID_PAT => {
                    if let Some(entries) = parse_pat(&section) {
                        self.programs.on_pat(&entries);
                    }
                }
                PID_SDT => {
                    if let Some(services) = parse_sdt(&section) {
                        self.programs.on_sdt(services);
                    }
                }
                _ => {
                    if let Some(pmt) = parse_pmt(&section) {
                        for (es_pid, binding) in self.programs.on_pmt(pid, pmt) {
                            self.bind(es_pid, binding);
                        }
                    }
                }
            }
        }
    }

    fn bind(&mut self, pid: u16, binding: StreamBinding) {
        match self.by_pid.get(&pid) {
            Some(&index) => self.streams[index].rebind(binding),
            None => {
                debug!(pid, format = binding.format.name(), source = ?binding.source, "new stream");
                self.by_pid.insert(pid, self.streams.len());
                let order = self.streams.len();
                self.streams.push(ElementaryStream::new(pid, binding, order));
            }
        }
    }

    fn handle_pes(&mut self, pid: u16, packet: &TransportPacket<'_>, window: ScanWindow) {
        if !self.by_pid.contains_key(&pid) {
            if !packet.payload_start {
                return;
            }
            let Some(header) = parse_pes_header(packet.payload) else {
                return;
            };
            let es = packet.payload.get(header.header_len..).unwrap_or_default();
            let Some(format) = sniff(header.stream_id, es) else {
                return;
            };
            self.bind(pid, StreamBinding::sniffed(format));
        }
        if let Some(&index) = self.by_pid.get(&pid) {
            self.streams[index].on_packet(packet.payload, packet.payload_start, window);
        }
    }

    /// Every PCR PID has accumulated more than [`PCR_SETTLE_SECS`].
    fn pcr_settled(&self) -> bool {
        !self.pcr.is_empty() && self.pcr.values().all(|s| s.elapsed_secs() > PCR_SETTLE_SECS)
    }

    fn close_window(&mut self, window: ScanWindow) {
        for stream in &mut self.streams {
            stream.close_window(window);
        }
        for span in self.pcr.values_mut() {
            span.note_seek();
        }
        for assembler in self.sections.values_mut() {
            assembler.reset();
        }
    }
}

/// Probe a transport stream (MPEG-TS or BDAV) from a seekable source.
///
/// `label` becomes [`MediaInfo::file_path`].
pub fn probe_transport<R: Read + Seek>(
    mut reader: R,
    file_size: u64,
    label: &str,
    options: &ProbeOptions,
) -> Result<MediaInfo> {
    let Some((format, first)) = detect_format(&mut reader)? else {
        return Err(ProbeError::NoSync {
            probed: file_size.min(ALIGNMENT_PROBE as u64),
        });
    };
    debug!(format = format.name(), first, file_size, "transport stream alignment");

    let mut scanner = PacketScanner::new(reader, format, first, file_size)?;
    let mut planner = ScanPlanner::new(file_size, first, options);
    let mut demux = Demuxer::new();

    loop {
        if options.is_cancelled() {
            debug!(offset = scanner.position(), "scan cancelled");
            planner.on_window_end();
            break;
        }
        let step = match scanner.next_packet()? {
            Some((offset, packet)) => {
                demux.handle_packet(offset, &packet, planner.window());
                planner.on_progress(scanner.position(), demux.pcr_settled())
            }
            None => planner.on_window_end(),
        };
        match step {
            ScanStep::Continue => {}
            ScanStep::SeekTo { start, end } => {
                demux.close_window(planner.window());
                scanner.seek_window(start, end)?;
                planner.tail_started(scanner.position());
                debug!(start = scanner.position(), end, "tail window");
            }
            ScanStep::Finish => break,
        }
    }

    if scanner.valid_packets() == 0 {
        return Err(ProbeError::NoSync { probed: file_size });
    }
    let window = planner.window();
    for stream in &mut demux.streams {
        stream.close_window(window);
    }

    let scanned_packets = scanner.valid_packets() + scanner.invalid_packets();
    if let Some((head_end, tail_start)) = planner.skipped_range() {
        if !options.is_cancelled() {
            let limit = head_end.saturating_add(2 * options.head_window()).min(tail_start);
            recover_parameters(&mut scanner, &mut demux, head_end, limit, options)?;
        }
    }

    let packet_size = format.packet_size() as u64;
    let totals = ScanTotals {
        format,
        file_size,
        total_packets: file_size.saturating_sub(first) / packet_size,
        scanned_packets,
        windowed: planner.windowed(),
    };
    Ok(output::assemble(
        label,
        &demux.streams,
        &demux.pcr,
        &demux.programs,
        totals,
    ))
}

/// Read `[start, end)` for the video PIDs that still lack sequence
/// parameters, stopping as soon as all of them have been recovered.
fn recover_parameters<R: Read + Seek>(
    scanner: &mut PacketScanner<R>,
    demux: &mut Demuxer,
    start: u64,
    end: u64,
    options: &ProbeOptions,
) -> Result<()> {
    let mut pending: Vec<u16> = demux
        .streams
        .iter()
        .filter(|s| s.needs_recovery())
        .map(|s| s.pid)
        .collect();
    if pending.is_empty() || start >= end {
        return Ok(());
    }
    debug!(?pending, start, end, "parameter recovery pass");

    scanner.seek_window(start, end)?;
    while !pending.is_empty() && !options.is_cancelled() {
        let Some((_, packet)) = scanner.next_packet()? else {
            break;
        };
        if !pending.contains(&packet.pid) {
            continue;
        }
        let Some(&index) = demux.by_pid.get(&packet.pid) else {
            continue;
        };
        if demux.streams[index].recover_packet(packet.payload, packet.payload_start) {
            debug!(pid = packet.pid, "sequence parameters recovered");
            pending.retain(|&pid| pid != packet.pid);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ac3::tests::ac3_frame;
    use crate::codec::mpeg2::tests::mpeg2_access_unit;
    use crate::ts::packet::{SYNC_BYTE, TS_PACKET_SIZE};
    use crate::ts::pes::tests::pes_packet;
    use crate::ts::psi::tests::{pat_section, pmt_section};
    use crate::types::{FieldValue, StreamKind};
    use std::io::Cursor;

    /// Packetize `data` on `pid`, padding the last packet with adaptation
    /// field stuffing. `pcr` goes into the first packet.
    fn packetize(out: &mut Vec<u8>, pid: u16, cc: &mut u8, data: &[u8], pcr: Option<u64>) {
        let mut rest = data;
        let mut pcr = pcr;
        loop {
            let reserved = if pcr.is_some() { 7 } else { 0 };
            let needs_af = pcr.is_some() || rest.len() < 184;
            let take = if needs_af { rest.len().min(183 - reserved) } else { 184 };
            let mut packet = vec![SYNC_BYTE, (pid >> 8) as u8, pid as u8, *cc & 0x0F];
            if rest.len() == data.len() {
                packet[1] |= 0x40;
            }
            if needs_af {
                packet[3] |= 0x30;
                let af_len = 183 - take;
                packet.push(af_len as u8);
                if af_len > 0 {
                    match pcr.take() {
                        Some(pcr) => {
                            let (base, ext) = (pcr / 300, pcr % 300);
                            packet.extend_from_slice(&[
                                0x10,
                                (base >> 25) as u8,
                                (base >> 17) as u8,
                                (base >> 9) as u8,
                                (base >> 1) as u8,
                                ((base & 1) << 7) as u8 | 0x7E | (ext >> 8) as u8,
                                ext as u8,
                            ]);
                        }
                        None => packet.push(0x00),
                    }
                    packet.resize(5 + af_len, 0xFF);
                }
            } else {
                packet[3] |= 0x10;
            }
            packet.extend_from_slice(&rest[..take]);
            assert_eq!(packet.len(), TS_PACKET_SIZE);
            out.extend_from_slice(&packet);
            *cc = cc.wrapping_add(1);
            rest = &rest[take..];
            if rest.is_empty() {
                break;
            }
        }
    }

    fn section_payload(section: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x00];
        payload.extend_from_slice(section);
        payload
    }

    /// 2 s of 25 fps MPEG-2 video on 0x100 (PCR) and 384 kb/s AC-3 on 0x101.
    fn fixture(with_psi_first: bool) -> Vec<u8> {
        let pat = section_payload(&pat_section(&[(1, 0x1000)]));
        let pmt = section_payload(&pmt_section(
            1,
            0x100,
            &[],
            &[(0x02, 0x100, &[][..]), (0x81, 0x101, &[][..])],
        ));
        let mut out = Vec::new();
        let (mut cc_pat, mut cc_pmt, mut cc_v, mut cc_a) = (0u8, 0u8, 0u8, 0u8);
        let mut emit_psi = |out: &mut Vec<u8>| {
            packetize(out, PID_PAT, &mut cc_pat, &pat, None);
            packetize(out, 0x1000, &mut cc_pmt, &pmt, None);
        };
        // 50 video frames at 3600 ticks; audio frames every 2880 ticks
        let mut audio_pts = 0u64;
        for frame in 0..=50u64 {
            let pts = 90_000 + frame * 3600;
            if frame % 10 == 0 && (with_psi_first || frame > 0) {
                emit_psi(&mut out);
            }
            let video = pes_packet(0xE0, pts, &mpeg2_access_unit(frame % 10 == 0), false);
            packetize(&mut out, 0x100, &mut cc_v, &video, Some((pts - 9000) * 300));
            while audio_pts <= frame * 3600 {
                let audio = pes_packet(0xBD, 90_000 + audio_pts, &ac3_frame(28, 27), true);
                packetize(&mut out, 0x101, &mut cc_a, &audio, None);
                audio_pts += 2880;
            }
        }
        out
    }

    #[test]
    fn test_end_to_end_mpeg2_and_ac3() {
        let data = fixture(true);
        let size = data.len() as u64;
        let info =
            probe_transport(Cursor::new(data), size, "fixture.ts", &ProbeOptions::default())
                .unwrap();

        assert_eq!(info.container, "MPEG-TS");
        let kinds: Vec<StreamKind> = info.streams.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StreamKind::Video, StreamKind::Audio]);
        assert_eq!(info.summary.duration_ms, Some(2000));

        let video = &info.streams[0];
        assert_eq!(video.field("Format"), Some("MPEG Video"));
        assert_eq!(video.field("Width"), Some("720"));
        assert_eq!(video.get("FrameCount"), Some(&FieldValue::UInt(51)));
        assert_eq!(video.get("Duration"), Some(&FieldValue::UInt(2040)));

        let audio = &info.streams[1];
        assert_eq!(audio.field("Format"), Some("AC-3"));
        assert_eq!(audio.get("BitRate"), Some(&FieldValue::UInt(384_000)));
        assert_eq!(audio.get("dialnorm_Average").and_then(FieldValue::as_f64), Some(-27.0));
        assert!(!info.summary.estimated);
    }

    #[test]
    fn test_pes_before_pmt_is_sniffed_and_rebound() {
        let data = fixture(false);
        let size = data.len() as u64;
        let info = probe_transport(Cursor::new(data), size, "late.ts", &ProbeOptions::default())
            .unwrap();
        let video = &info.streams[0];
        assert_eq!(video.get("ID"), Some(&FieldValue::UInt(0x100)));
        assert_eq!(video.get("MenuID"), Some(&FieldValue::UInt(1)));
        assert_eq!(video.get("FrameCount"), Some(&FieldValue::UInt(51)));
    }

    #[test]
    fn test_no_sync_is_an_error() {
        let data = vec![0u8; 100_000];
        let err = probe_transport(Cursor::new(data), 100_000, "x", &ProbeOptions::default())
            .unwrap_err();
        assert!(matches!(err, ProbeError::NoSync { .. }));
    }
}
