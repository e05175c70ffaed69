//! VC-1 advanced profile (SMPTE 421M Annex E byte stream)

use super::bits::{find_start_code, Bits};
use super::{FrameRecord, FrameResult};
use crate::types::{ColourDescription, FieldValue, StreamKind};

const SEQUENCE_HEADER: u8 = 0x0F;
const FRAME_START: u8 = 0x0D;

#[derive(Debug, Clone, Default)]
pub struct Vc1Parser;

impl Vc1Parser {
    pub fn new() -> Self {
        Self
    }

    pub fn try_parse_frame(&mut self, bytes: &[u8], resolved: bool) -> FrameResult {
        if find_start_code(bytes, 0).is_none() {
            return FrameResult::NotAFrame;
        }
        let mut record = FrameRecord::new(StreamKind::Video);
        record.frames = 0;
        let mut pos = 0;
        while let Some(sc) = find_start_code(bytes, pos) {
            let Some(&code) = bytes.get(sc + 3) else {
                break;
            };
            let body_start = sc + 4;
            let body_end = find_start_code(bytes, body_start).unwrap_or(bytes.len());
            match code {
                FRAME_START => record.frames += 1,
                SEQUENCE_HEADER if !resolved && !record.key_params => {
                    if parse_sequence_header(&bytes[body_start..body_end], &mut record).is_some() {
                        record.key_params = true;
                    }
                }
                _ => {}
            }
            pos = body_end;
        }
        FrameResult::Frame {
            record,
            consumed: bytes.len(),
        }
    }
}

fn parse_sequence_header(body: &[u8], record: &mut FrameRecord) -> Option<()> {
    let mut r = Bits::new(body);
    let profile = r.read_bits(2)?;
    if profile != 3 {
        return None;
    }
    let level = r.read_bits(3)?;
    let chroma = r.read_bits(2)?;
    r.skip(3 + 5 + 1)?; // FRMRTQ_POSTPROC, BITRTQ_POSTPROC, POSTPROCFLAG
    let width = (r.read_bits(12)? + 1) * 2;
    let height = (r.read_bits(12)? + 1) * 2;
    r.skip(1)?; // PULLDOWN
    let interlace = r.read_flag()?;
    r.skip(1 + 1 + 1 + 1)?; // TFCNTRFLAG, FINTERPFLAG, reserved, PSF

    let facts = &mut record.facts;
    facts.set("Format", "VC-1");
    facts.set("Format_Profile", format!("Advanced@L{}", level));
    facts.set("Width", width);
    facts.set("Height", height);
    facts.set(
        "ChromaSubsampling",
        if chroma == 1 { "4:2:0" } else { "4:2:2" },
    );
    facts.set("BitDepth", 8u32);
    facts.set(
        "ScanType",
        if interlace { "Interlaced" } else { "Progressive" },
    );

    if r.read_flag()? {
        r.skip(14 + 14)?; // DISP_HORIZ_SIZE, DISP_VERT_SIZE
        if r.read_flag()? {
            if r.read_bits(4)? == 15 {
                r.skip(16)?;
            }
        }
        if r.read_flag()? {
            let rate = if r.read_flag()? {
                (r.read_bits(16)? as f64 + 1.0) / 32.0
            } else {
                let nr = match r.read_bits(8)? {
                    1 => 24.0,
                    2 => 25.0,
                    3 => 30.0,
                    4 => 50.0,
                    5 => 60.0,
                    6 => 48.0,
                    7 => 72.0,
                    _ => 0.0,
                };
                let dr = match r.read_bits(4)? {
                    1 => 1000.0,
                    2 => 1001.0,
                    _ => 0.0,
                };
                if dr > 0.0 {
                    nr * 1000.0 / dr
                } else {
                    0.0
                }
            };
            if rate > 0.0 {
                facts.set("FrameRate", FieldValue::decimal(rate, 3));
            }
        }
        if r.read_flag()? {
            ColourDescription {
                primaries: r.read_bits(8)? as u8,
                transfer: r.read_bits(8)? as u8,
                matrix: r.read_bits(8)? as u8,
                full_range: false,
            }
            .apply_to(facts);
        }
    }
    Some(())
}
