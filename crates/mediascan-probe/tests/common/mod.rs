//! Transport stream synthesis shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;

use bitstream_io::{BigEndian, BitWrite, BitWriter};
use mediascan_probe::ts::section::crc32_mpeg2;

pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x100;
pub const AUDIO_PID: u16 = 0x101;
pub const PTS_ORIGIN: u64 = 90_000;
/// 1536 samples at 48 kHz
pub const AC3_FRAME_TICKS: u64 = 2880;
/// 25 fps
pub const VIDEO_FRAME_TICKS: u64 = 3600;

/// Packet framing to synthesise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Ts,
    Bdav,
}

/// Packetises sections and PES units, tracking continuity per PID.
pub struct TsMux {
    framing: Framing,
    counters: HashMap<u16, u8>,
    arrival: u32,
    pub out: Vec<u8>,
}

impl TsMux {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            counters: HashMap::new(),
            arrival: 0,
            out: Vec::new(),
        }
    }

    pub fn set_counter(&mut self, pid: u16, cc: u8) {
        self.counters.insert(pid, cc & 0x0F);
    }

    /// Emit a PSI section, pointer field included.
    pub fn section(&mut self, pid: u16, section: &[u8]) {
        let mut payload = vec![0x00];
        payload.extend_from_slice(section);
        self.payload(pid, &payload, None);
    }

    /// Emit a PES unit. `pcr` (27 MHz) goes into the first packet.
    pub fn pes(&mut self, pid: u16, stream_id: u8, pts: u64, es: &[u8], bounded: bool, pcr: Option<u64>) {
        let unit = pes_unit(stream_id, pts, es, bounded);
        self.payload(pid, &unit, pcr);
    }

    /// One packet carrying nothing but null payload.
    pub fn null_packet(&mut self) {
        self.packet(0x1FFF, false, None, &[0xFF; 184]);
    }

    fn payload(&mut self, pid: u16, data: &[u8], mut pcr: Option<u64>) {
        let mut rest = data;
        let mut first = true;
        while first || !rest.is_empty() {
            let room = if pcr.is_some() { 184 - 8 } else { 184 };
            let take = rest.len().min(room);
            self.packet(pid, first, pcr.take(), &rest[..take]);
            rest = &rest[take..];
            first = false;
        }
    }

    fn packet(&mut self, pid: u16, payload_start: bool, pcr: Option<u64>, payload: &[u8]) {
        let cc = self.counters.entry(pid).or_insert(0);
        let counter = *cc;
        *cc = (*cc + 1) & 0x0F;

        let mut w = BitWriter::endian(Vec::new(), BigEndian);
        if self.framing == Framing::Bdav {
            w.write(2, 0u8).unwrap();
            w.write(30, self.arrival).unwrap();
            self.arrival = self.arrival.wrapping_add(1000) & 0x3FFF_FFFF;
        }
        let needs_af = pcr.is_some() || payload.len() < 184;
        w.write(8, 0x47u8).unwrap();
        w.write_bit(false).unwrap(); // transport_error_indicator
        w.write_bit(payload_start).unwrap();
        w.write_bit(false).unwrap(); // transport_priority
        w.write(13, pid).unwrap();
        w.write(2, 0u8).unwrap(); // scrambling
        w.write(2, if needs_af { 3u8 } else { 1u8 }).unwrap();
        w.write(4, counter).unwrap();

        if needs_af {
            let af_len = 183 - payload.len();
            w.write(8, af_len as u8).unwrap();
            if af_len > 0 {
                w.write(3, 0u8).unwrap(); // discontinuity, random access, priority
                w.write_bit(pcr.is_some()).unwrap();
                w.write(4, 0u8).unwrap();
                let mut used = 1;
                if let Some(pcr) = pcr {
                    w.write(33, pcr / 300).unwrap();
                    w.write(6, 0x3Fu8).unwrap();
                    w.write(9, (pcr % 300) as u16).unwrap();
                    used += 6;
                }
                for _ in used..af_len {
                    w.write(8, 0xFFu8).unwrap();
                }
            }
        }
        w.write_bytes(payload).unwrap();
        let packet = w.into_writer();
        let expected = if self.framing == Framing::Bdav { 192 } else { 188 };
        assert_eq!(packet.len(), expected);
        self.out.extend_from_slice(&packet);
    }
}

/// A PES unit with a PTS. Unbounded units carry a zero packet length.
pub fn pes_unit(stream_id: u8, pts: u64, es: &[u8], bounded: bool) -> Vec<u8> {
    let length = if bounded { (8 + es.len()) as u16 } else { 0 };
    let mut w = BitWriter::endian(Vec::new(), BigEndian);
    w.write(24, 0x000001u32).unwrap();
    w.write(8, stream_id).unwrap();
    w.write(16, length).unwrap();
    w.write(2, 2u8).unwrap();
    w.write(6, 0u8).unwrap();
    w.write(2, 2u8).unwrap(); // PTS only
    w.write(6, 0u8).unwrap();
    w.write(8, 5u8).unwrap();
    w.write(4, 2u8).unwrap();
    w.write(3, ((pts >> 30) & 0x07) as u8).unwrap();
    w.write_bit(true).unwrap();
    w.write(15, ((pts >> 15) & 0x7FFF) as u16).unwrap();
    w.write_bit(true).unwrap();
    w.write(15, (pts & 0x7FFF) as u16).unwrap();
    w.write_bit(true).unwrap();
    w.write_bytes(es).unwrap();
    w.into_writer()
}

/// A long-form PSI section with CRC.
pub fn long_section(table_id: u8, extension: u16, body: &[u8]) -> Vec<u8> {
    let mut w = BitWriter::endian(Vec::new(), BigEndian);
    w.write(8, table_id).unwrap();
    w.write_bit(true).unwrap(); // section_syntax_indicator
    w.write_bit(false).unwrap();
    w.write(2, 3u8).unwrap();
    w.write(12, (body.len() + 9) as u16).unwrap();
    w.write(16, extension).unwrap();
    w.write(2, 3u8).unwrap();
    w.write(5, 0u8).unwrap(); // version
    w.write_bit(true).unwrap(); // current_next_indicator
    w.write(8, 0u8).unwrap(); // section_number
    w.write(8, 0u8).unwrap(); // last_section_number
    w.write_bytes(body).unwrap();
    let mut section = w.into_writer();
    let crc = crc32_mpeg2(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

pub fn pat(programs: &[(u16, u16)]) -> Vec<u8> {
    let mut w = BitWriter::endian(Vec::new(), BigEndian);
    for &(number, pid) in programs {
        w.write(16, number).unwrap();
        w.write(3, 7u8).unwrap();
        w.write(13, pid).unwrap();
    }
    long_section(0x00, 1, &w.into_writer())
}

/// `streams` are (stream_type, pid, descriptors).
pub fn pmt(program: u16, pcr_pid: u16, program_descriptors: &[u8], streams: &[(u8, u16, Vec<u8>)]) -> Vec<u8> {
    let mut w = BitWriter::endian(Vec::new(), BigEndian);
    w.write(3, 7u8).unwrap();
    w.write(13, pcr_pid).unwrap();
    w.write(4, 0xFu8).unwrap();
    w.write(12, program_descriptors.len() as u16).unwrap();
    w.write_bytes(program_descriptors).unwrap();
    for (stream_type, pid, descriptors) in streams {
        w.write(8, *stream_type).unwrap();
        w.write(3, 7u8).unwrap();
        w.write(13, *pid).unwrap();
        w.write(4, 0xFu8).unwrap();
        w.write(12, descriptors.len() as u16).unwrap();
        w.write_bytes(descriptors).unwrap();
    }
    long_section(0x02, program, &w.into_writer())
}

pub fn sdt(service_id: u16, service_type: u8, provider: &str, name: &str) -> Vec<u8> {
    let mut descriptor = vec![0x48, 0, service_type, provider.len() as u8];
    descriptor.extend_from_slice(provider.as_bytes());
    descriptor.push(name.len() as u8);
    descriptor.extend_from_slice(name.as_bytes());
    descriptor[1] = (descriptor.len() - 2) as u8;

    let mut w = BitWriter::endian(Vec::new(), BigEndian);
    w.write(16, 1u16).unwrap(); // original_network_id
    w.write(8, 0xFFu8).unwrap();
    w.write(16, service_id).unwrap();
    w.write(6, 0x3Fu8).unwrap();
    w.write(2, 0u8).unwrap(); // EIT flags
    w.write(3, 4u8).unwrap(); // running
    w.write_bit(false).unwrap(); // free_CA_mode
    w.write(12, descriptor.len() as u16).unwrap();
    w.write_bytes(&descriptor).unwrap();
    long_section(0x42, 1, &w.into_writer())
}

pub fn language_descriptor(code: &str) -> Vec<u8> {
    let mut d = vec![0x0A, 4];
    d.extend_from_slice(code.as_bytes());
    d.push(0);
    d
}

pub const HDMV_REGISTRATION: [u8; 6] = [0x05, 4, b'H', b'D', b'M', b'V'];

/// A 384 kb/s, 48 kHz stereo AC-3 frame (1536 bytes) with `dialnorm`.
pub fn ac3_frame(dialnorm: u8) -> Vec<u8> {
    let mut w = BitWriter::endian(Vec::new(), BigEndian);
    w.write(16, 0x0B77u16).unwrap();
    w.write(16, 0u16).unwrap(); // crc1
    w.write(2, 0u8).unwrap(); // fscod 48 kHz
    w.write(6, 28u8).unwrap(); // frmsizecod
    w.write(5, 8u8).unwrap(); // bsid
    w.write(3, 0u8).unwrap(); // bsmod
    w.write(3, 2u8).unwrap(); // acmod 2/0
    w.write(2, 0u8).unwrap(); // dsurmod
    w.write_bit(false).unwrap(); // lfeon
    w.write(5, dialnorm).unwrap();
    w.write_bit(false).unwrap(); // compre
    w.write_bit(false).unwrap(); // langcode
    w.write_bit(false).unwrap(); // audprodie
    w.write(2, 0u8).unwrap(); // copyrightb, origbs
    w.write_bit(false).unwrap(); // timecod1e
    w.write_bit(false).unwrap(); // timecod2e
    w.write_bit(false).unwrap(); // addbsie
    w.byte_align().unwrap();
    let mut frame = w.into_writer();
    frame.resize(1536, 0);
    frame
}

/// One MPEG-2 picture, optionally preceded by a 720x576 25 fps sequence
/// header and sequence extension.
pub fn mpeg2_picture(with_sequence: bool) -> Vec<u8> {
    let mut data = Vec::new();
    if with_sequence {
        data.extend_from_slice(&[0, 0, 1, 0xB3]);
        data.extend_from_slice(&[0x2D, 0x02, 0x40, 0x33, 0x00, 0x61, 0xA8, 0x20, 0x00]);
        data.extend_from_slice(&[0, 0, 1, 0xB5]);
        data.extend_from_slice(&[0x14, 0x82, 0x00, 0x01, 0x00, 0x00]);
    }
    data.extend_from_slice(&[0, 0, 1, 0x00, 0x00, 0x0F, 0xFF, 0xF8]);
    data.extend_from_slice(&[0, 0, 1, 0x01, 0x22, 0x33]);
    data
}

/// Layout of a synthesised program.
pub struct Program {
    pub framing: Framing,
    pub seconds: u64,
    /// Audio listed before video in the PMT
    pub audio_first: bool,
    pub sdt: Option<(&'static str, &'static str)>,
    pub language: Option<&'static str>,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            framing: Framing::Ts,
            seconds: 2,
            audio_first: false,
            sdt: None,
            language: None,
        }
    }
}

/// MPEG-2 video on [`VIDEO_PID`] (carrying the PCR) and AC-3 on
/// [`AUDIO_PID`], with tables repeated every ten video frames.
pub fn program_stream(program: &Program) -> Vec<u8> {
    let hdmv = program.framing == Framing::Bdav;
    let (video_type, audio_type) = (0x02, 0x81);
    let audio_descriptors = program.language.map(language_descriptor).unwrap_or_default();
    let mut streams = vec![
        (video_type, VIDEO_PID, Vec::new()),
        (audio_type, AUDIO_PID, audio_descriptors),
    ];
    if program.audio_first {
        streams.reverse();
    }
    let program_descriptors: &[u8] = if hdmv { &HDMV_REGISTRATION } else { &[] };
    let pat = pat(&[(1, PMT_PID)]);
    let pmt = pmt(1, VIDEO_PID, program_descriptors, &streams);
    let sdt = program.sdt.map(|(provider, name)| sdt(1, 0x01, provider, name));

    let mut mux = TsMux::new(program.framing);
    let frames = program.seconds * 25;
    let mut audio_pts = 0;
    for frame in 0..=frames {
        if frame % 10 == 0 {
            mux.section(0x0000, &pat);
            mux.section(PMT_PID, &pmt);
            if let Some(sdt) = &sdt {
                mux.section(0x0011, sdt);
            }
        }
        let pts = PTS_ORIGIN + frame * VIDEO_FRAME_TICKS;
        let picture = mpeg2_picture(frame % 10 == 0);
        mux.pes(VIDEO_PID, 0xE0, pts, &picture, false, Some((pts - 9000) * 300));
        while audio_pts <= frame * VIDEO_FRAME_TICKS {
            mux.pes(AUDIO_PID, 0xBD, PTS_ORIGIN + audio_pts, &ac3_frame(27), true, None);
            audio_pts += AC3_FRAME_TICKS;
        }
    }
    mux.out
}

/// Packets per group of [`SyntheticStream`]: one table packet, nine audio
/// packets, and one null or video packet.
pub const GROUP_PACKETS: u64 = 11;
pub const GROUP_BYTES: u64 = GROUP_PACKETS * 188;

/// Dialnorm carried by the audio frame of group `g`.
pub fn group_dialnorm(g: u64) -> u8 {
    1 + (g % 31) as u8
}

/// One AC-3 frame per group, PCR on the audio PID. With `video`, each
/// group also carries one MPEG-2 picture, with a sequence header only in
/// the groups of the range.
fn synthetic_group(g: u64, video: Option<&Range<u64>>) -> Vec<u8> {
    let mut mux = TsMux::new(Framing::Ts);
    mux.set_counter(0x0000, (g / 2) as u8);
    mux.set_counter(PMT_PID, (g / 2) as u8);
    mux.set_counter(AUDIO_PID, (g * 9) as u8);
    mux.set_counter(VIDEO_PID, g as u8);
    if g % 2 == 0 {
        mux.section(0x0000, &pat(&[(1, PMT_PID)]));
    } else {
        let mut streams = vec![(0x81, AUDIO_PID, Vec::new())];
        if video.is_some() {
            streams.insert(0, (0x02, VIDEO_PID, Vec::new()));
        }
        mux.section(PMT_PID, &pmt(1, AUDIO_PID, &[], &streams));
    }
    let pts = PTS_ORIGIN + g * AC3_FRAME_TICKS;
    mux.pes(
        AUDIO_PID,
        0xBD,
        pts,
        &ac3_frame(group_dialnorm(g)),
        true,
        Some((pts - 4500) * 300),
    );
    match video {
        Some(sequence) => {
            let picture = mpeg2_picture(sequence.contains(&g));
            mux.pes(VIDEO_PID, 0xE0, pts, &picture, false, None);
        }
        None => mux.null_packet(),
    }
    assert_eq!(mux.out.len() as u64, GROUP_BYTES);
    mux.out
}

/// A seekable transport stream generated on demand, so large files can be
/// probed without holding them in memory.
pub struct SyntheticStream {
    groups: u64,
    video: Option<Range<u64>>,
    pos: u64,
    cached: Option<(u64, Vec<u8>)>,
}

impl SyntheticStream {
    /// Audio only.
    pub fn new(groups: u64) -> Self {
        Self {
            groups,
            video: None,
            pos: 0,
            cached: None,
        }
    }

    /// Audio plus an MPEG-2 video PID whose sequence header is only carried
    /// by the groups in `sequence`.
    pub fn with_video(groups: u64, sequence: Range<u64>) -> Self {
        Self {
            video: Some(sequence),
            ..Self::new(groups)
        }
    }

    pub fn len(&self) -> u64 {
        self.groups * GROUP_BYTES
    }
}

impl Read for SyntheticStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len() || buf.is_empty() {
            return Ok(0);
        }
        let g = self.pos / GROUP_BYTES;
        if self.cached.as_ref().map(|(cached, _)| *cached) != Some(g) {
            self.cached = Some((g, synthetic_group(g, self.video.as_ref())));
        }
        let Some((_, group)) = &self.cached else {
            return Ok(0);
        };
        let start = (self.pos - g * GROUP_BYTES) as usize;
        let n = buf.len().min(group.len() - start);
        buf[..n].copy_from_slice(&group[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SyntheticStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(d) => self.len() as i64 + d,
            SeekFrom::Current(d) => self.pos as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}
