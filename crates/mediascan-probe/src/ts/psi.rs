//! PAT, PMT and SDT section parsing
//!
//! Sections arrive whole from the [`SectionAssembler`](super::section::SectionAssembler).
//! Every parser checks the table id and the CRC and returns `None` for
//! anything malformed; the caller skips the section.

use tracing::trace;

use super::section::crc32_mpeg2;
use crate::hdr::dolby_vision::parse_dv_config;
use crate::types::HdrFormat;

pub const TABLE_PAT: u8 = 0x00;
pub const TABLE_PMT: u8 = 0x02;
pub const TABLE_SDT_ACTUAL: u8 = 0x42;

mod tag {
    pub const REGISTRATION: u8 = 0x05;
    pub const ISO_639_LANGUAGE: u8 = 0x0A;
    pub const SERVICE: u8 = 0x48;
    pub const TELETEXT: u8 = 0x56;
    pub const SUBTITLING: u8 = 0x59;
    pub const AC3: u8 = 0x6A;
    pub const EAC3: u8 = 0x7A;
    pub const DTS: u8 = 0x7B;
    pub const AAC: u8 = 0x7C;
    pub const DOVI: u8 = 0xB0;
}

/// One PAT entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// A program map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pmt {
    pub program_number: u16,
    pub pcr_pid: Option<u16>,
    /// Program-level registration format identifier (e.g. `HDMV`)
    pub registration: Option<[u8; 4]>,
    pub streams: Vec<PmtStream>,
}

impl Pmt {
    /// Blu-ray program: stream types follow the HDMV table.
    pub fn is_hdmv(&self) -> bool {
        matches!(&self.registration, Some(id) if id == b"HDMV" || id == b"HDPR")
    }
}

/// One elementary stream entry of a PMT
#[derive(Debug, Clone, PartialEq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub pid: u16,
    pub descriptors: StreamDescriptors,
}

/// The stream descriptors that affect classification or output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDescriptors {
    pub language: Option<String>,
    pub registration: Option<[u8; 4]>,
    pub ac3: bool,
    pub eac3: bool,
    pub dts: bool,
    pub aac: bool,
    pub subtitling: bool,
    pub teletext: bool,
    pub dovi: Option<HdrFormat>,
}

/// One SDT service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdtService {
    pub service_id: u16,
    pub service_type: Option<u8>,
    pub provider: Option<String>,
    pub name: Option<String>,
}

/// Generic long-form section header fields
struct LongSection<'a> {
    table_id_extension: u16,
    body: &'a [u8],
}

/// Validate a long-form section (syntax indicator, length, CRC) and split
/// off its body.
fn long_section(section: &[u8], table_id: u8) -> Option<LongSection<'_>> {
    if section.len() < 12 || section[0] != table_id || section[1] & 0x80 == 0 {
        return None;
    }
    let length = 3 + ((usize::from(section[1] & 0x0F) << 8) | usize::from(section[2]));
    if length > section.len() || length < 12 {
        return None;
    }
    let section = &section[..length];
    if crc32_mpeg2(section) != 0 {
        trace!(table_id, "section CRC mismatch");
        return None;
    }
    // current_next_indicator: a "next" table is not applicable yet
    if section[5] & 0x01 == 0 {
        return None;
    }
    Some(LongSection {
        table_id_extension: u16::from_be_bytes([section[3], section[4]]),
        body: &section[8..length - 4],
    })
}

fn pid_of(hi: u8, lo: u8) -> u16 {
    (u16::from(hi & 0x1F) << 8) | u16::from(lo)
}

fn length_of(hi: u8, lo: u8) -> usize {
    (usize::from(hi & 0x0F) << 8) | usize::from(lo)
}

/// Parse a program association section. The network PID entry
/// (program 0) is skipped.
pub fn parse_pat(section: &[u8]) -> Option<Vec<PatEntry>> {
    let parsed = long_section(section, TABLE_PAT)?;
    Some(
        parsed
            .body
            .chunks_exact(4)
            .filter_map(|e| {
                let program_number = u16::from_be_bytes([e[0], e[1]]);
                (program_number != 0).then(|| PatEntry {
                    program_number,
                    pmt_pid: pid_of(e[2], e[3]),
                })
            })
            .collect(),
    )
}

/// Parse a program map section.
pub fn parse_pmt(section: &[u8]) -> Option<Pmt> {
    let parsed = long_section(section, TABLE_PMT)?;
    let body = parsed.body;
    if body.len() < 4 {
        return None;
    }
    let pcr_pid = pid_of(body[0], body[1]);
    let info_len = length_of(body[2], body[3]);
    let program_descriptors = body.get(4..4 + info_len)?;

    let mut pmt = Pmt {
        program_number: parsed.table_id_extension,
        pcr_pid: (pcr_pid != 0x1FFF).then_some(pcr_pid),
        registration: None,
        streams: Vec::new(),
    };
    for (tag, data) in descriptors(program_descriptors) {
        if tag == tag::REGISTRATION && data.len() >= 4 {
            pmt.registration = Some([data[0], data[1], data[2], data[3]]);
        }
    }

    let mut rest = &body[4 + info_len..];
    while rest.len() >= 5 {
        let stream_type = rest[0];
        let pid = pid_of(rest[1], rest[2]);
        let es_len = length_of(rest[3], rest[4]);
        let Some(es_descriptors) = rest.get(5..5 + es_len) else {
            trace!(pid, "truncated ES info loop");
            break;
        };
        pmt.streams.push(PmtStream {
            stream_type,
            pid,
            descriptors: parse_stream_descriptors(es_descriptors),
        });
        rest = &rest[5 + es_len..];
    }
    Some(pmt)
}

/// Iterate (tag, body) pairs of a descriptor loop, stopping at the first
/// descriptor that overruns the loop.
fn descriptors(mut data: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    std::iter::from_fn(move || {
        if data.len() < 2 {
            return None;
        }
        let (tag, len) = (data[0], data[1] as usize);
        let body = data.get(2..2 + len)?;
        data = &data[2 + len..];
        Some((tag, body))
    })
}

fn parse_stream_descriptors(data: &[u8]) -> StreamDescriptors {
    let mut out = StreamDescriptors::default();
    for (tag, body) in descriptors(data) {
        match tag {
            tag::ISO_639_LANGUAGE | tag::SUBTITLING | tag::TELETEXT => {
                if out.language.is_none() {
                    out.language = language_code(body);
                }
                out.subtitling |= tag == tag::SUBTITLING;
                out.teletext |= tag == tag::TELETEXT;
            }
            tag::REGISTRATION if body.len() >= 4 => {
                out.registration = Some([body[0], body[1], body[2], body[3]]);
            }
            tag::AC3 => out.ac3 = true,
            tag::EAC3 => out.eac3 = true,
            tag::DTS => out.dts = true,
            tag::AAC => out.aac = true,
            tag::DOVI => out.dovi = parse_dovi_descriptor(body),
            _ => {}
        }
    }
    out
}

fn language_code(body: &[u8]) -> Option<String> {
    let code = body.get(..3)?;
    code.iter()
        .all(u8::is_ascii_alphabetic)
        .then(|| String::from_utf8_lossy(code).to_ascii_lowercase())
}

/// The DOVI video stream descriptor shares the configuration record layout,
/// except that a stream without a base layer carries a 16-bit dependency
/// PID before the compatibility id.
fn parse_dovi_descriptor(body: &[u8]) -> Option<HdrFormat> {
    let bl_present = body.get(3).is_some_and(|b| b & 0x01 != 0);
    if bl_present || body.len() < 7 {
        return parse_dv_config(body);
    }
    let mut config = body[..4].to_vec();
    config.push(body[6]);
    parse_dv_config(&config)
}

/// Parse an SDT (actual transport stream) section.
pub fn parse_sdt(section: &[u8]) -> Option<Vec<SdtService>> {
    let parsed = long_section(section, TABLE_SDT_ACTUAL)?;
    // original_network_id (16) + reserved (8)
    let mut rest = parsed.body.get(3..)?;
    let mut services = Vec::new();
    while rest.len() >= 5 {
        let service_id = u16::from_be_bytes([rest[0], rest[1]]);
        let loop_len = length_of(rest[3], rest[4]);
        let Some(loop_data) = rest.get(5..5 + loop_len) else {
            break;
        };
        let mut service = SdtService {
            service_id,
            ..Default::default()
        };
        for (tag, body) in descriptors(loop_data) {
            if tag == tag::SERVICE {
                parse_service_descriptor(body, &mut service);
            }
        }
        services.push(service);
        rest = &rest[5 + loop_len..];
    }
    Some(services)
}

fn parse_service_descriptor(body: &[u8], service: &mut SdtService) {
    let Some((&service_type, rest)) = body.split_first() else {
        return;
    };
    service.service_type = Some(service_type);
    let Some((&provider_len, rest)) = rest.split_first() else {
        return;
    };
    let Some(provider) = rest.get(..provider_len as usize) else {
        return;
    };
    service.provider = Some(decode_dvb_string(provider)).filter(|s| !s.is_empty());
    let rest = &rest[provider_len as usize..];
    if let Some((&name_len, rest)) = rest.split_first() {
        if let Some(name) = rest.get(..name_len as usize) {
            service.name = Some(decode_dvb_string(name)).filter(|s| !s.is_empty());
        }
    }
}

/// Decode a DVB text field (EN 300 468 annex A).
///
/// A leading byte below 0x20 selects the character table: 0x15 is UTF-8,
/// 0x10 is followed by a two-byte ISO 8859 part number, others name a
/// single-byte table. Single-byte tables are decoded as Latin-1, which is
/// exact for the ASCII range service names almost always use. Control
/// codes 0x80..=0x9F (emphasis, line breaks) are dropped.
pub fn decode_dvb_string(data: &[u8]) -> String {
    let (utf8, text) = match data.first() {
        Some(0x15) => (true, &data[1..]),
        Some(0x10) => (false, data.get(3..).unwrap_or_default()),
        Some(&b) if b < 0x20 => (false, &data[1..]),
        _ => (false, data),
    };
    let decoded: String = if utf8 {
        String::from_utf8_lossy(text).into_owned()
    } else {
        text.iter()
            .filter(|&&b| !(0x80..=0x9F).contains(&b))
            .map(|&b| char::from(b))
            .collect()
    };
    decoded.trim().to_string()
}
