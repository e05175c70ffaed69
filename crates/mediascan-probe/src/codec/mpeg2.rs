//! MPEG-1/2 video: sequence header and extensions, picture counting

use super::bits::{find_start_code, Bits};
use super::{FrameRecord, FrameResult};
use crate::types::{ColourDescription, FieldValue, StreamKind};

const PICTURE_START: u8 = 0x00;
const SEQUENCE_HEADER: u8 = 0xB3;
const EXTENSION_START: u8 = 0xB5;

/// (numerator, denominator) by frame_rate_code.
const FRAME_RATES: [(u32, u32); 9] = [
    (0, 1),
    (24000, 1001),
    (24, 1),
    (25, 1),
    (30000, 1001),
    (30, 1),
    (50, 1),
    (60000, 1001),
    (60, 1),
];

#[derive(Debug, Clone, Default)]
pub struct Mpeg2VideoParser;

impl Mpeg2VideoParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse one access unit worth of bytes. Sequence-level facts are only
    /// decoded while `resolved` is false.
    pub fn try_parse_frame(&mut self, bytes: &[u8], resolved: bool) -> FrameResult {
        let Some(first) = find_start_code(bytes, 0) else {
            return FrameResult::NotAFrame;
        };
        let mut record = FrameRecord::new(StreamKind::Video);
        record.frames = 0;

        let mut pos = first;
        let mut have_sequence = false;
        let mut mpeg2 = false;
        while let Some(sc) = find_start_code(bytes, pos) {
            let Some(&code) = bytes.get(sc + 3) else {
                break;
            };
            let body_start = sc + 4;
            let body_end = find_start_code(bytes, body_start).unwrap_or(bytes.len());
            let body = &bytes[body_start..body_end];
            match code {
                PICTURE_START => record.frames += 1,
                SEQUENCE_HEADER if !resolved => {
                    have_sequence |= parse_sequence_header(body, &mut record);
                }
                EXTENSION_START if !resolved && have_sequence => {
                    mpeg2 |= parse_extension(body, &mut record);
                }
                _ => {}
            }
            pos = body_end;
        }

        if have_sequence {
            record.facts.set("Format", "MPEG Video");
            record.facts.set(
                "Format_Version",
                if mpeg2 { "Version 2" } else { "Version 1" },
            );
            record.facts.set_if_absent("ChromaSubsampling", "4:2:0");
            record.facts.set("BitDepth", 8u32);
            record.key_params = true;
        }
        FrameResult::Frame {
            record,
            consumed: bytes.len(),
        }
    }
}

fn parse_sequence_header(body: &[u8], record: &mut FrameRecord) -> bool {
    let mut r = Bits::new(body);
    let parsed = (|| {
        let width = r.read_bits(12)?;
        let height = r.read_bits(12)?;
        let aspect = r.read_bits(4)?;
        let rate_code = r.read_bits(4)? as usize;
        let bit_rate = r.read_bits(18)?;
        Some((width, height, aspect, rate_code, bit_rate))
    })();
    let Some((width, height, aspect, rate_code, bit_rate)) = parsed else {
        return false;
    };
    if width == 0 || height == 0 || rate_code == 0 || rate_code >= FRAME_RATES.len() {
        return false;
    }
    let facts = &mut record.facts;
    facts.set("Width", width);
    facts.set("Height", height);
    let (num, den) = FRAME_RATES[rate_code];
    facts.set("FrameRate", FieldValue::decimal(num as f64 / den as f64, 3));
    facts.set("FrameRate_Num", num);
    facts.set("FrameRate_Den", den);
    match aspect {
        2 => facts.set("DisplayAspectRatio", FieldValue::decimal(4.0 / 3.0, 3)),
        3 => facts.set("DisplayAspectRatio", FieldValue::decimal(16.0 / 9.0, 3)),
        4 => facts.set("DisplayAspectRatio", FieldValue::decimal(2.21, 3)),
        _ => {}
    }
    if bit_rate != 0x3FFFF {
        facts.set("BitRate_Maximum", bit_rate as u64 * 400);
    }
    true
}

/// Returns true for a sequence extension (MPEG-2 proper).
fn parse_extension(body: &[u8], record: &mut FrameRecord) -> bool {
    let mut r = Bits::new(body);
    match r.read_bits(4) {
        Some(1) => {
            let parsed = (|| {
                let profile_level = r.read_bits(8)?;
                let progressive = r.read_flag()?;
                let chroma = r.read_bits(2)?;
                Some((profile_level, progressive, chroma))
            })();
            let Some((profile_level, progressive, chroma)) = parsed else {
                return false;
            };
            let facts = &mut record.facts;
            if profile_level & 0x80 == 0 {
                let profile = match (profile_level >> 4) & 0x07 {
                    1 => "High",
                    2 => "Spatial",
                    3 => "SNR",
                    4 => "Main",
                    5 => "Simple",
                    _ => "",
                };
                let level = match profile_level & 0x0F {
                    4 => "High",
                    6 => "High 1440",
                    8 => "Main",
                    10 => "Low",
                    _ => "",
                };
                if !profile.is_empty() && !level.is_empty() {
                    facts.set("Format_Profile", format!("{}@{}", profile, level));
                }
            } else if profile_level == 0x85 || profile_level == 0x82 {
                facts.set("Format_Profile", "4:2:2@Main");
            }
            facts.set(
                "ScanType",
                if progressive { "Progressive" } else { "Interlaced" },
            );
            match chroma {
                2 => facts.set("ChromaSubsampling", "4:2:2"),
                3 => facts.set("ChromaSubsampling", "4:4:4"),
                _ => facts.set("ChromaSubsampling", "4:2:0"),
            }
            true
        }
        Some(2) => {
            // sequence_display_extension
            let parsed = (|| {
                r.skip(3)?; // video_format
                if !r.read_flag()? {
                    return None;
                }
                Some(ColourDescription {
                    primaries: r.read_bits(8)? as u8,
                    transfer: r.read_bits(8)? as u8,
                    matrix: r.read_bits(8)? as u8,
                    full_range: false,
                })
            })();
            if let Some(colour) = parsed {
                colour.apply_to(&mut record.facts);
            }
            false
        }
        _ => false,
    }
}
