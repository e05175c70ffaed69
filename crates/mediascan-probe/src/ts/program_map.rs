//! Program structure and PID bindings
//!
//! The PAT is append-only for the duration of a scan and its first program
//! becomes the primary one. PMTs bind elementary PIDs to a format; a PID
//! that carried recognisable PES data before its PMT arrived is bound by
//! sniffing and rebound once the PMT entry shows up.

use std::collections::HashMap;

use super::psi::{PatEntry, Pmt, PmtStream, SdtService};
use crate::codec::bits::find_start_code;
use crate::codec::CodecFormat;
use crate::types::{HdrFormat, ProgramInfo, StreamKind};

/// Where a binding came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingSource {
    Pmt,
    Sniffed,
}

/// What is known about an elementary PID's content
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBinding {
    pub kind: StreamKind,
    pub format: CodecFormat,
    pub language: Option<String>,
    pub stream_type: Option<u8>,
    pub program_number: Option<u16>,
    pub source: BindingSource,
    /// Dolby Vision configuration from a DOVI descriptor
    pub dovi: Option<HdrFormat>,
}

impl StreamBinding {
    pub fn sniffed(format: CodecFormat) -> Self {
        Self {
            kind: format.kind(),
            format,
            language: None,
            stream_type: None,
            program_number: None,
            source: BindingSource::Sniffed,
            dovi: None,
        }
    }

    fn from_pmt(program_number: u16, stream: &PmtStream, hdmv: bool) -> Self {
        let format = classify(stream, hdmv);
        Self {
            kind: format.kind(),
            format,
            language: stream.descriptors.language.clone(),
            stream_type: Some(stream.stream_type),
            program_number: Some(program_number),
            source: BindingSource::Pmt,
            dovi: stream.descriptors.dovi.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct Program {
    number: u16,
    pmt_pid: u16,
    pmt: Option<Pmt>,
}

/// Programs, their PMT PIDs and the services describing them
#[derive(Debug, Default)]
pub struct ProgramMap {
    programs: Vec<Program>,
    services: HashMap<u16, SdtService>,
}

impl ProgramMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record PAT entries. Programs already known are left alone.
    pub fn on_pat(&mut self, entries: &[PatEntry]) {
        for entry in entries {
            if self.programs.iter().any(|p| p.number == entry.program_number) {
                continue;
            }
            self.programs.push(Program {
                number: entry.program_number,
                pmt_pid: entry.pmt_pid,
                pmt: None,
            });
        }
    }

    pub fn is_pmt_pid(&self, pid: u16) -> bool {
        self.programs.iter().any(|p| p.pmt_pid == pid)
    }

    /// The first program announced by the PAT
    pub fn primary_program(&self) -> Option<u16> {
        self.programs.first().map(|p| p.number)
    }

    /// Store a PMT and return the bindings it declares, in PMT order.
    pub fn on_pmt(&mut self, pid: u16, pmt: Pmt) -> Vec<(u16, StreamBinding)> {
        let Some(program) = self
            .programs
            .iter_mut()
            .find(|p| p.number == pmt.program_number && p.pmt_pid == pid)
        else {
            return Vec::new();
        };
        let hdmv = pmt.is_hdmv();
        let bindings = pmt
            .streams
            .iter()
            .map(|s| (s.pid, StreamBinding::from_pmt(pmt.program_number, s, hdmv)))
            .collect();
        program.pmt = Some(pmt);
        bindings
    }

    pub fn on_sdt(&mut self, services: Vec<SdtService>) {
        for service in services {
            self.services.insert(service.service_id, service);
        }
    }

    /// Program descriptions, in PAT order
    pub fn programs(&self) -> Vec<ProgramInfo> {
        self.programs
            .iter()
            .map(|p| {
                let service = self.services.get(&p.number);
                ProgramInfo {
                    program_number: p.number,
                    pmt_pid: p.pmt_pid,
                    pcr_pid: p.pmt.as_ref().and_then(|pmt| pmt.pcr_pid),
                    service_name: service.and_then(|s| s.name.clone()),
                    service_provider: service.and_then(|s| s.provider.clone()),
                    service_type: service.and_then(|s| s.service_type),
                    pids: p
                        .pmt
                        .as_ref()
                        .map(|pmt| pmt.streams.iter().map(|s| s.pid).collect())
                        .unwrap_or_default(),
                }
            })
            .collect()
    }

    /// The primary program, when an SDT service describes it.
    pub fn primary_service(&self) -> Option<ProgramInfo> {
        let primary = self.primary_program()?;
        self.services.get(&primary)?;
        self.programs()
            .into_iter()
            .find(|p| p.program_number == primary)
    }
}

/// Map a PMT entry to a format. HDMV (Blu-ray) programs use their own
/// table for the 0x80..0x92 range; stream type 0x06 (private PES) is split
/// by descriptors.
pub fn classify(stream: &PmtStream, hdmv: bool) -> CodecFormat {
    let d = &stream.descriptors;
    match stream.stream_type {
        0x01 => CodecFormat::Mpeg1Video,
        0x02 => CodecFormat::Mpeg2Video,
        0x03 | 0x04 => CodecFormat::MpegAudio,
        0x0F => CodecFormat::AacAdts,
        0x11 => CodecFormat::AacLatm,
        0x1B => CodecFormat::H264,
        0x24 => CodecFormat::Hevc,
        0xEA => CodecFormat::Vc1,
        0x80 if hdmv => CodecFormat::Lpcm,
        0x80 => CodecFormat::Mpeg2Video,
        0x81 => CodecFormat::Ac3,
        0x82 if hdmv => CodecFormat::Dts,
        0x83 if hdmv => CodecFormat::TrueHd,
        0x84 | 0x87 | 0xA1 => CodecFormat::Eac3,
        0x85 | 0x86 | 0xA2 if hdmv => CodecFormat::DtsHd,
        0x90 if hdmv => CodecFormat::Pgs,
        0x91 if hdmv => CodecFormat::Igs,
        0x92 if hdmv => CodecFormat::TextSubtitle,
        0x06 => match d.registration.as_ref().map(|r| &r[..]) {
            Some(b"AC-3") => CodecFormat::Ac3,
            Some(b"EAC3") => CodecFormat::Eac3,
            Some(b"DTS1" | b"DTS2" | b"DTS3") => CodecFormat::Dts,
            Some(b"HEVC") => CodecFormat::Hevc,
            Some(b"VC-1") => CodecFormat::Vc1,
            _ if d.eac3 => CodecFormat::Eac3,
            _ if d.ac3 => CodecFormat::Ac3,
            _ if d.dts => CodecFormat::Dts,
            _ if d.aac => CodecFormat::AacAdts,
            _ if d.subtitling => CodecFormat::DvbSubtitle,
            _ if d.teletext => CodecFormat::Teletext,
            _ => CodecFormat::Unknown,
        },
        _ => CodecFormat::Unknown,
    }
}

/// Guess the format of an unbound PID from the start of a PES payload.
///
/// Only an unambiguous sync pattern right at the start of the payload
/// counts; anything else is left for the PMT to decide.
pub fn sniff(stream_id: u8, es: &[u8]) -> Option<CodecFormat> {
    match stream_id {
        0xE0..=0xEF => sniff_video(es),
        0xC0..=0xDF => match es {
            [0xFF, b1, ..] if b1 & 0xF6 == 0xF0 => Some(CodecFormat::AacAdts),
            [0xFF, b1, ..] if b1 & 0xE0 == 0xE0 && b1 & 0x06 != 0 => Some(CodecFormat::MpegAudio),
            _ => None,
        },
        0xBD | 0xFD => match es {
            [0x0B, 0x77, _, _, _, b5, ..] if b5 >> 3 > 10 => Some(CodecFormat::Eac3),
            [0x0B, 0x77, ..] => Some(CodecFormat::Ac3),
            [0x7F, 0xFE, 0x80, 0x01, ..] => Some(CodecFormat::Dts),
            _ => None,
        },
        _ => None,
    }
}

fn sniff_video(es: &[u8]) -> Option<CodecFormat> {
    let start = find_start_code(es, 0)?;
    let header = es.get(start + 3..start + 5)?;
    match header {
        [0xB3, _] => Some(CodecFormat::Mpeg2Video),
        [0x0F, _] => Some(CodecFormat::Vc1),
        [b0, 0x01] if matches!((b0 >> 1) & 0x3F, 32..=35) => Some(CodecFormat::Hevc),
        [b0, _] if matches!(b0 & 0x1F, 7 | 9) && b0 & 0x80 == 0 => Some(CodecFormat::H264),
        _ => None,
    }
}
