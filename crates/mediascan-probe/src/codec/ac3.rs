//! AC-3 and E-AC-3 sync frame parsing
//!
//! Both share the `0x0B77` sync word and are told apart by `bsid`
//! (≤ 10 for AC-3, 11–16 for E-AC-3). Besides stream parameters every frame
//! yields its dialnorm and, when signalled, compr and dynrng values.

use super::bits::Bits;
use super::{FrameRecord, FrameResult};
use crate::types::StreamKind;

const SYNC: [u8; 2] = [0x0B, 0x77];

const SAMPLE_RATES: [u32; 3] = [48000, 44100, 32000];
const REDUCED_SAMPLE_RATES: [u32; 3] = [24000, 22050, 16000];

/// Nominal bitrate in kbps, indexed by `frmsizecod / 2`.
const BITRATES_KBPS: [u32; 19] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 576, 640,
];

/// Frame sizes in 16-bit words per sample rate, indexed by `frmsizecod / 2`.
const FRAME_WORDS: [[u16; 19]; 3] = [
    [
        64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 640, 768, 896, 1024, 1152,
        1280,
    ],
    [
        69, 87, 104, 121, 139, 174, 208, 243, 278, 348, 417, 487, 557, 696, 835, 975, 1114, 1253,
        1393,
    ],
    [
        96, 120, 144, 168, 192, 240, 288, 336, 384, 480, 576, 672, 768, 960, 1152, 1344, 1536, 1728,
        1920,
    ],
];

/// Full-bandwidth channels per `acmod`.
const FULL_CHANNELS: [u8; 8] = [2, 1, 2, 3, 3, 4, 4, 5];

const AC3_SAMPLES_PER_FRAME: u32 = 1536;

/// Parser for the AC-3 family.
#[derive(Debug, Clone, Default)]
pub struct Ac3Parser;

/// Fixed header fields, decodable from the first 6 bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Header {
    enhanced: bool,
    frame_size: usize,
    sample_rate: u32,
    samples: u32,
    bitrate: u32,
    /// E-AC-3 dependent substream
    dependent: bool,
}

impl Ac3Parser {
    pub fn new() -> Self {
        Self
    }

    pub fn try_parse_frame(&mut self, bytes: &[u8]) -> FrameResult {
        let Some(header) = parse_header(bytes) else {
            return FrameResult::NotAFrame;
        };
        if bytes.len() < header.frame_size {
            return FrameResult::Truncated;
        }
        let frame = &bytes[..header.frame_size];
        let record = if header.enhanced {
            parse_eac3_bsi(frame, &header)
        } else {
            parse_ac3_bsi(frame, &header)
        };
        match record {
            Some(record) => FrameResult::Frame {
                record,
                consumed: header.frame_size,
            },
            None => FrameResult::NotAFrame,
        }
    }

    pub fn is_sync(&self, bytes: &[u8]) -> bool {
        if bytes.len() < 6 {
            return bytes.len() >= 2 && bytes[..2] == SYNC;
        }
        parse_header(bytes).is_some()
    }

    pub fn find_sync(&self, bytes: &[u8]) -> Option<usize> {
        bytes.windows(2).position(|w| w == SYNC)
    }
}

fn parse_header(data: &[u8]) -> Option<Header> {
    if data.len() < 6 || data[..2] != SYNC {
        return None;
    }
    let bsid = data[5] >> 3;
    match bsid {
        0..=10 => {
            let fscod = (data[4] >> 6) as usize;
            let frmsizecod = (data[4] & 0x3F) as usize;
            if fscod >= 3 || frmsizecod >= 38 {
                return None;
            }
            let mut words = FRAME_WORDS[fscod][frmsizecod / 2] as usize;
            if fscod == 1 && frmsizecod & 1 == 1 {
                words += 1;
            }
            Some(Header {
                enhanced: false,
                frame_size: words * 2,
                sample_rate: SAMPLE_RATES[fscod],
                samples: AC3_SAMPLES_PER_FRAME,
                bitrate: BITRATES_KBPS[frmsizecod / 2] * 1000,
                dependent: false,
            })
        }
        11..=16 => {
            let strmtyp = data[2] >> 6;
            if strmtyp == 3 {
                return None;
            }
            let frmsiz = (((data[2] & 0x07) as usize) << 8) | data[3] as usize;
            let frame_size = (frmsiz + 1) * 2;
            let fscod = (data[4] >> 6) as usize;
            let (sample_rate, blocks) = if fscod == 3 {
                let fscod2 = ((data[4] >> 4) & 0x03) as usize;
                if fscod2 == 3 {
                    return None;
                }
                (REDUCED_SAMPLE_RATES[fscod2], 6)
            } else {
                let blocks = [1u32, 2, 3, 6][((data[4] >> 4) & 0x03) as usize];
                (SAMPLE_RATES[fscod], blocks)
            };
            let samples = blocks * 256;
            let bitrate = (frame_size as u64 * 8 * sample_rate as u64 / samples as u64) as u32;
            Some(Header {
                enhanced: true,
                frame_size,
                sample_rate,
                samples,
                bitrate,
                dependent: strmtyp == 1,
            })
        }
        _ => None,
    }
}

/// dialnorm of 0 is reserved and read as -31 dB.
fn dialnorm_db(raw: u32) -> f64 {
    if raw == 0 {
        -31.0
    } else {
        -(raw as f64)
    }
}

/// compr: 4-bit signed exponent X, 4-bit mantissa Y.
fn compr_db(raw: u32) -> f64 {
    let x = ((raw >> 4) as i8) << 4 >> 4;
    let y = (raw & 0x0F) as f64;
    6.0206 * (x as f64 + 1.0) + 20.0 * ((16.0 + y) / 32.0).log10()
}

/// dynrng: 3-bit signed exponent X, 5-bit mantissa Y.
fn dynrng_db(raw: u32) -> f64 {
    let x = ((raw >> 5) as i8) << 5 >> 5;
    let y = (raw & 0x1F) as f64;
    6.0206 * (x as f64 + 1.0) + 20.0 * ((32.0 + y) / 64.0).log10()
}

fn channel_layout(acmod: u32, lfe: bool) -> String {
    let mut layout: Vec<&str> = match acmod {
        0 => vec!["M", "M"],
        1 => vec!["C"],
        2 => vec!["L", "R"],
        3 => vec!["L", "R", "C"],
        4 => vec!["L", "R"],
        5 => vec!["L", "R", "C"],
        6 => vec!["L", "R"],
        _ => vec!["L", "R", "C"],
    };
    if lfe {
        layout.push("LFE");
    }
    match acmod {
        4 | 5 => layout.push("S"),
        6 | 7 => layout.extend(["Ls", "Rs"]),
        _ => {}
    }
    layout.join(" ")
}

fn base_record(format: &str, header: &Header, acmod: u32, lfe: bool) -> FrameRecord {
    let mut record = FrameRecord::new(StreamKind::Audio);
    let channels = FULL_CHANNELS[acmod as usize] as u32 + lfe as u32;
    let facts = &mut record.facts;
    facts.set("Format", format);
    facts.set("BitRate_Mode", "CBR");
    facts.set("BitRate", header.bitrate);
    facts.set("Channels", channels);
    facts.set("ChannelLayout", channel_layout(acmod, lfe));
    facts.set("SamplingRate", header.sample_rate);
    facts.set("SamplesPerFrame", header.samples);
    record.duration_secs = Some(header.samples as f64 / header.sample_rate as f64);
    record
}

fn parse_ac3_bsi(frame: &[u8], header: &Header) -> Option<FrameRecord> {
    let mut r = Bits::new(frame);
    r.skip(16 + 16 + 2 + 6)?;
    let bsid = r.read_bits(5)?;
    let bsmod = r.read_bits(3)?;
    let acmod = r.read_bits(3)?;
    if acmod & 1 != 0 && acmod != 1 {
        r.skip(2)?; // cmixlev
    }
    if acmod & 4 != 0 {
        r.skip(2)?; // surmixlev
    }
    if acmod == 2 {
        r.skip(2)?; // dsurmod
    }
    let lfe = r.read_flag()?;
    let dialnorm = r.read_bits(5)?;
    let compr = if r.read_flag()? { Some(r.read_bits(8)?) } else { None };
    if r.read_flag()? {
        r.skip(8)?; // langcod
    }
    if r.read_flag()? {
        r.skip(5 + 2)?; // mixlevel, roomtyp
    }
    if acmod == 0 {
        r.skip(5)?; // dialnorm2
        if r.read_flag()? {
            r.skip(8)?;
        }
        if r.read_flag()? {
            r.skip(8)?;
        }
        if r.read_flag()? {
            r.skip(5 + 2)?;
        }
    }
    r.skip(2)?; // copyrightb, origbs
    if bsid == 6 {
        if r.read_flag()? {
            r.skip(2 + 3 + 3 + 3 + 3)?;
        }
        if r.read_flag()? {
            r.skip(2 + 2 + 1 + 8 + 1)?;
        }
    } else {
        if r.read_flag()? {
            r.skip(14)?;
        }
        if r.read_flag()? {
            r.skip(14)?;
        }
    }
    if r.read_flag()? {
        let addbsil = r.read_bits(6)?;
        r.skip((addbsil + 1) * 8)?;
    }

    // First audio block up to dynrng
    let nfchans = FULL_CHANNELS[acmod as usize] as u32;
    r.skip(nfchans * 2)?; // blksw, dithflag
    let dynrng = if r.read_flag()? { Some(r.read_bits(8)?) } else { None };

    let mut record = base_record("AC-3", header, acmod, lfe);
    record.facts.set("bsid", bsid);
    record.facts.set("bsmod", bsmod);
    record.facts.set("acmod", acmod);
    record.facts.set("lfeon", lfe as u32);
    record.metrics.push(("dialnorm", dialnorm_db(dialnorm)));
    if let Some(raw) = compr {
        record.metrics.push(("compr", compr_db(raw)));
    }
    if let Some(raw) = dynrng {
        record.metrics.push(("dynrng", dynrng_db(raw)));
    }
    Some(record)
}

fn parse_eac3_bsi(frame: &[u8], header: &Header) -> Option<FrameRecord> {
    let mut r = Bits::new(frame);
    r.skip(16)?;
    let _strmtyp = r.read_bits(2)?;
    let substreamid = r.read_bits(3)?;
    r.skip(11 + 2 + 2)?; // frmsiz, fscod, fscod2/numblkscod
    let acmod = r.read_bits(3)?;
    let lfe = r.read_flag()?;
    let bsid = r.read_bits(5)?;
    let dialnorm = r.read_bits(5)?;
    let compr = if r.read_flag()? { Some(r.read_bits(8)?) } else { None };

    if header.dependent {
        // Extends the independent frame of the same access unit.
        let mut record = FrameRecord::new(StreamKind::Audio);
        record.frames = 0;
        record.facts.set("Format_AdditionalFeatures", "Dep");
        return Some(record);
    }

    let mut record = base_record("E-AC-3", header, acmod, lfe);
    record.facts.set("BitRate_Mode", "VBR");
    record.facts.set("bsid", bsid);
    record.facts.set("acmod", acmod);
    record.facts.set("lfeon", lfe as u32);
    if substreamid != 0 {
        return Some(record);
    }
    record.metrics.push(("dialnorm", dialnorm_db(dialnorm)));
    if let Some(raw) = compr {
        record.metrics.push(("compr", compr_db(raw)));
    }
    Some(record)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bitstream_io::{BigEndian, BitWrite, BitWriter};

    /// Build a 48 kHz stereo AC-3 frame of `frmsizecod` with the given
    /// dialnorm. The rest of the frame is zero-filled.
    pub(crate) fn ac3_frame(frmsizecod: u8, dialnorm: u8) -> Vec<u8> {
        let size = FRAME_WORDS[0][(frmsizecod / 2) as usize] as usize * 2;
        let mut w = BitWriter::endian(Vec::new(), BigEndian);
        w.write(16, 0x0B77u32).unwrap();
        w.write(16, 0u32).unwrap(); // crc1
        w.write(2, 0u32).unwrap(); // fscod 48k
        w.write(6, frmsizecod as u32).unwrap();
        w.write(5, 8u32).unwrap(); // bsid
        w.write(3, 0u32).unwrap(); // bsmod
        w.write(3, 2u32).unwrap(); // acmod 2/0
        w.write(2, 0u32).unwrap(); // dsurmod
        w.write_bit(false).unwrap(); // lfeon
        w.write(5, dialnorm as u32).unwrap();
        w.write_bit(true).unwrap(); // compre
        w.write(8, 0xEFu32).unwrap(); // compr
        w.write_bit(false).unwrap(); // langcode
        w.write_bit(false).unwrap(); // audprodie
        w.write(2, 0u32).unwrap(); // copyrightb, origbs
        w.write_bit(false).unwrap(); // timecod1e
        w.write_bit(false).unwrap(); // timecod2e
        w.write_bit(false).unwrap(); // addbsie
        w.write(4, 0u32).unwrap(); // blksw, dithflag
        w.write_bit(true).unwrap(); // dynrnge
        w.write(8, 0x00u32).unwrap(); // dynrng
        w.byte_align().unwrap();
        let mut frame = w.into_writer();
        frame.resize(size, 0);
        frame
    }

    #[test]
    fn test_parse_ac3_frame() {
        let frame = ac3_frame(28, 27);
        assert_eq!(frame.len(), 1536);
        let mut parser = Ac3Parser::new();
        let FrameResult::Frame { record, consumed } = parser.try_parse_frame(&frame) else {
            panic!("expected a frame");
        };
        assert_eq!(consumed, 1536);
        assert_eq!(record.facts.field("Format"), Some("AC-3"));
        assert_eq!(record.facts.field("BitRate"), Some("384000"));
        assert_eq!(record.facts.field("Channels"), Some("2"));
        assert_eq!(record.facts.field("ChannelLayout"), Some("L R"));
        assert_eq!(record.frames, 1);
        assert_eq!(record.metrics[0], ("dialnorm", -27.0));
        // compr 0xEF: X = -2, Y = 15
        let compr = record.metrics[1].1;
        assert!((compr - (-6.0206 + 20.0 * (31.0f64 / 32.0).log10())).abs() < 1e-9);
        // dynrng 0: X = 0, Y = 0 -> 6.0206 - 6.0206
        assert!(record.metrics[2].1.abs() < 1e-3);
    }

    #[test]
    fn test_truncated_frame() {
        let frame = ac3_frame(28, 27);
        let mut parser = Ac3Parser::new();
        assert!(matches!(
            parser.try_parse_frame(&frame[..700]),
            FrameResult::Truncated
        ));
        assert!(matches!(
            parser.try_parse_frame(&[0x0B, 0x77, 0, 0, 0xFF, 0x40]),
            FrameResult::NotAFrame
        ));
    }

    #[test]
    fn test_eac3_header() {
        // strmtyp 0, substreamid 0, frmsiz 767 -> 1536 bytes, fscod 0, numblkscod 3
        let mut frame = vec![0x0B, 0x77, 0x02, 0xFF, 0x34, 16 << 3];
        frame.resize(1536, 0);
        let header = parse_header(&frame).unwrap();
        assert!(header.enhanced);
        assert_eq!(header.frame_size, 1536);
        assert_eq!(header.bitrate, 384000);

        let mut parser = Ac3Parser::new();
        let FrameResult::Frame { record, .. } = parser.try_parse_frame(&frame) else {
            panic!("expected a frame");
        };
        assert_eq!(record.facts.field("Format"), Some("E-AC-3"));
        assert_eq!(record.facts.field("ChannelLayout"), Some("L R"));
    }

    #[test]
    fn test_find_sync() {
        let parser = Ac3Parser::new();
        assert_eq!(parser.find_sync(&[0x00, 0x00, 0x0B, 0x77]), Some(2));
        assert_eq!(parser.find_sync(&[0x00, 0x0B, 0x00]), None);
    }

    #[test]
    fn test_gain_words() {
        assert_eq!(dialnorm_db(0), -31.0);
        // X = -1 (0b111), Y = 0 -> 0 + 20log10(0.5)
        assert!((dynrng_db(0xE0) - 20.0 * 0.5f64.log10()).abs() < 1e-9);
    }
}
