//! DTS core frames and DTS-HD extension substreams

use super::bits::Bits;
use super::{FrameRecord, FrameResult};
use crate::types::StreamKind;

const CORE_SYNC: [u8; 4] = [0x7F, 0xFE, 0x80, 0x01];
const SUBSTREAM_SYNC: [u8; 4] = [0x64, 0x58, 0x20, 0x25];

const XLL_SYNC: [u8; 4] = [0x41, 0xA2, 0x95, 0x47];
const XBR_SYNC: [u8; 4] = [0x65, 0x5E, 0x31, 0x5E];
const X96_SYNC: [u8; 4] = [0x1D, 0x95, 0xF2, 0x62];

/// Core sampling frequency by SFREQ; 0 is invalid.
const SAMPLE_RATES: [u32; 16] = [
    0, 8000, 16000, 32000, 0, 0, 11025, 22050, 44100, 0, 0, 12000, 24000, 48000, 0, 0,
];

/// Transmission bit rate in kbps by RATE; 0 is open/variable/lossless.
const BIT_RATES_KBPS: [u32; 32] = [
    32, 56, 64, 96, 112, 128, 192, 224, 256, 320, 384, 448, 512, 576, 640, 768, 896, 1024, 1152,
    1280, 1344, 1408, 1411, 1472, 1536, 1920, 2048, 3072, 3840, 0, 0, 0,
];

#[derive(Debug, Clone, Default)]
pub struct DtsParser;

struct Core {
    frame_size: usize,
    samples: u32,
    sample_rate: u32,
    bitrate_kbps: u32,
    amode: u32,
    lfe: bool,
    bit_depth: u32,
}

impl DtsParser {
    pub fn new() -> Self {
        Self
    }

    pub fn try_parse_frame(&mut self, bytes: &[u8]) -> FrameResult {
        if bytes.len() >= 4 && bytes[..4] == SUBSTREAM_SYNC {
            // Extension substream without a core (DTS Express / lossless only)
            return match substream_size(bytes) {
                Some(size) if size <= bytes.len() => {
                    let mut record = FrameRecord::new(StreamKind::Audio);
                    record.facts.set("Format", "DTS");
                    record
                        .facts
                        .set("Format_Profile", extension_profile(&bytes[..size]));
                    FrameResult::Frame {
                        record,
                        consumed: size,
                    }
                }
                Some(_) => FrameResult::Truncated,
                None => FrameResult::NotAFrame,
            };
        }

        let Some(core) = parse_core(bytes) else {
            return FrameResult::NotAFrame;
        };
        if bytes.len() < core.frame_size {
            return FrameResult::Truncated;
        }

        let mut consumed = core.frame_size;
        let mut profile = None;
        let rest = &bytes[consumed..];
        if rest.len() >= 4 && rest[..4] == SUBSTREAM_SYNC {
            match substream_size(rest) {
                Some(size) if size <= rest.len() => {
                    profile = Some(extension_profile(&rest[..size]));
                    consumed += size;
                }
                Some(_) => return FrameResult::Truncated,
                None => {}
            }
        }

        let mut record = FrameRecord::new(StreamKind::Audio);
        let facts = &mut record.facts;
        facts.set("Format", "DTS");
        if let Some(profile) = profile {
            facts.set("Format_Profile", format!("{} / Core", profile));
            facts.set("BitRate_Mode", "VBR");
        } else {
            facts.set("BitRate_Mode", "CBR");
            if core.bitrate_kbps > 0 {
                facts.set("BitRate", core.bitrate_kbps * 1000);
            }
        }
        if let Some((channels, layout)) = channel_layout(core.amode, core.lfe) {
            facts.set("Channels", channels);
            facts.set("ChannelLayout", layout);
        }
        facts.set("SamplingRate", core.sample_rate);
        facts.set("SamplesPerFrame", core.samples);
        facts.set("BitDepth", core.bit_depth);
        record.duration_secs = Some(core.samples as f64 / core.sample_rate as f64);
        FrameResult::Frame { record, consumed }
    }

    pub fn is_sync(&self, bytes: &[u8]) -> bool {
        bytes.len() >= 4 && (bytes[..4] == CORE_SYNC || bytes[..4] == SUBSTREAM_SYNC)
    }

    pub fn find_sync(&self, bytes: &[u8]) -> Option<usize> {
        bytes
            .windows(4)
            .position(|w| w == CORE_SYNC || w == SUBSTREAM_SYNC)
    }
}

fn parse_core(bytes: &[u8]) -> Option<Core> {
    if bytes.len() < 16 || bytes[..4] != CORE_SYNC {
        return None;
    }
    let mut r = Bits::new(&bytes[4..]);
    if !r.read_flag()? {
        return None; // FTYPE: termination frames are not counted
    }
    r.skip(5)?; // SHORT
    let crc_present = r.read_flag()?;
    let nblks = r.read_bits(7)?;
    let fsize = r.read_bits(14)?;
    let amode = r.read_bits(6)?;
    let sfreq = r.read_bits(4)? as usize;
    let rate = r.read_bits(5)? as usize;
    r.skip(1 + 1 + 1 + 1 + 1)?; // fixed bit, DYNF, TIMEF, AUXF, HDCD
    r.skip(3 + 1 + 1)?; // EXT_AUDIO_ID, EXT_AUDIO, ASPF
    let lff = r.read_bits(2)?;
    r.skip(1)?; // HFLAG
    if crc_present {
        r.skip(16)?;
    }
    r.skip(1 + 4 + 2)?; // FILTS, VERNUM, CHIST
    let pcmr = r.read_bits(3)?;

    if nblks < 5 || fsize < 95 {
        return None;
    }
    let sample_rate = SAMPLE_RATES[sfreq];
    if sample_rate == 0 {
        return None;
    }
    Some(Core {
        frame_size: fsize as usize + 1,
        samples: (nblks + 1) * 32,
        sample_rate,
        bitrate_kbps: BIT_RATES_KBPS[rate],
        amode,
        lfe: lff == 1 || lff == 2,
        bit_depth: match pcmr {
            0 | 1 => 16,
            2 | 3 => 20,
            _ => 24,
        },
    })
}

/// Total size of an extension substream starting at `bytes`.
fn substream_size(bytes: &[u8]) -> Option<usize> {
    let mut r = Bits::new(bytes.get(4..)?);
    r.skip(8 + 2)?; // UserDefinedBits, nExtSSIndex
    let long_header = r.read_flag()?;
    let (header_bits, size_bits) = if long_header { (12, 20) } else { (8, 16) };
    r.skip(header_bits)?;
    Some(r.read_bits(size_bits)? as usize + 1)
}

fn extension_profile(substream: &[u8]) -> &'static str {
    let has = |sync: &[u8; 4]| substream.windows(4).any(|w| w == sync);
    if has(&XLL_SYNC) {
        "MA"
    } else if has(&XBR_SYNC) || has(&X96_SYNC) {
        "HRA"
    } else {
        "HD"
    }
}

fn channel_layout(amode: u32, lfe: bool) -> Option<(u32, String)> {
    let (count, layout) = match amode {
        0 => (1, "C"),
        1 => (2, "M M"),
        2 | 3 => (2, "L R"),
        4 => (2, "Lt Rt"),
        5 => (3, "C L R"),
        6 => (3, "L R S"),
        7 => (4, "C L R S"),
        8 => (4, "L R Ls Rs"),
        9 => (5, "C L R Ls Rs"),
        _ => return None,
    };
    if lfe {
        Some((count + 1, format!("{} LFE", layout)))
    } else {
        Some((count, layout.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream_io::{BigEndian, BitWrite, BitWriter};

    /// 48 kHz 5.1 core frame at 1536 kbps, 512 samples.
    fn core_frame(fsize: u32) -> Vec<u8> {
        let mut w = BitWriter::endian(Vec::new(), BigEndian);
        w.write(32, 0x7FFE_8001u32).unwrap();
        w.write_bit(true).unwrap(); // FTYPE
        w.write(5, 31u32).unwrap(); // SHORT
        w.write_bit(false).unwrap(); // CPF
        w.write(7, 15u32).unwrap(); // NBLKS
        w.write(14, fsize - 1).unwrap();
        w.write(6, 9u32).unwrap(); // AMODE
        w.write(4, 13u32).unwrap(); // SFREQ
        w.write(5, 24u32).unwrap(); // RATE
        w.write(10, 0u32).unwrap();
        w.write(2, 2u32).unwrap(); // LFF
        w.write(8, 0u32).unwrap(); // HFLAG, FILTS, VERNUM, CHIST
        w.write(3, 5u32).unwrap(); // PCMR
        w.byte_align().unwrap();
        let mut frame = w.into_writer();
        frame.resize(fsize as usize, 0);
        frame
    }

    #[test]
    fn test_parse_core() {
        let frame = core_frame(2012);
        let mut parser = DtsParser::new();
        let FrameResult::Frame { record, consumed } = parser.try_parse_frame(&frame) else {
            panic!("expected a frame");
        };
        assert_eq!(consumed, 2012);
        assert_eq!(record.facts.field("Channels"), Some("6"));
        assert_eq!(record.facts.field("ChannelLayout"), Some("C L R Ls Rs LFE"));
        assert_eq!(record.facts.field("BitRate"), Some("1536000"));
        assert_eq!(record.facts.field("BitDepth"), Some("24"));
        assert_eq!(record.facts.field("SamplesPerFrame"), Some("512"));
    }

    #[test]
    fn test_core_with_lossless_extension() {
        let mut data = core_frame(2012);
        // substream: short header, header size 15, fsize 63 -> 64 bytes
        let mut ext = SUBSTREAM_SYNC.to_vec();
        let mut w = BitWriter::endian(Vec::new(), BigEndian);
        w.write(8, 0u32).unwrap();
        w.write(2, 0u32).unwrap();
        w.write_bit(false).unwrap();
        w.write(8, 15u32).unwrap();
        w.write(16, 63u32).unwrap();
        w.byte_align().unwrap();
        ext.extend(w.into_writer());
        ext.extend_from_slice(&XLL_SYNC);
        ext.resize(64, 0);
        data.extend_from_slice(&ext);

        let mut parser = DtsParser::new();
        let FrameResult::Frame { record, consumed } = parser.try_parse_frame(&data) else {
            panic!("expected a frame");
        };
        assert_eq!(consumed, 2012 + 64);
        assert_eq!(record.facts.field("Format_Profile"), Some("MA / Core"));
        assert!(record.facts.field("BitRate").is_none());
    }

    #[test]
    fn test_truncated_core() {
        let frame = core_frame(2012);
        let mut parser = DtsParser::new();
        assert!(matches!(
            parser.try_parse_frame(&frame[..1000]),
            FrameResult::Truncated
        ));
    }
}
