//! AAC framing: ADTS and LATM/LOAS

use super::bits::Bits;
use super::{FrameRecord, FrameResult};
use crate::types::StreamKind;

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

const LOAS_SYNC: u32 = 0x2B7;

/// AAC transport flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacMux {
    Adts,
    Latm,
}

/// Decoded AudioSpecificConfig essentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AudioConfig {
    object_type: u32,
    sample_rate: u32,
    channel_config: u32,
    sbr: bool,
    ps: bool,
}

#[derive(Debug, Clone)]
pub struct AacParser {
    mux: AacMux,
    /// LATM StreamMuxConfig carried over `useSameStreamMux` frames
    latm_config: Option<AudioConfig>,
}

impl AacParser {
    pub fn new(mux: AacMux) -> Self {
        Self {
            mux,
            latm_config: None,
        }
    }

    pub fn try_parse_frame(&mut self, bytes: &[u8]) -> FrameResult {
        match self.mux {
            AacMux::Adts => parse_adts(bytes),
            AacMux::Latm => self.parse_loas(bytes),
        }
    }

    pub fn is_sync(&self, bytes: &[u8]) -> bool {
        match self.mux {
            AacMux::Adts => bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xF6 == 0xF0,
            AacMux::Latm => bytes.len() >= 2 && bytes[0] == 0x56 && bytes[1] & 0xE0 == 0xE0,
        }
    }

    pub fn find_sync(&self, bytes: &[u8]) -> Option<usize> {
        (0..bytes.len().saturating_sub(1)).find(|&i| self.is_sync(&bytes[i..]))
    }

    fn parse_loas(&mut self, bytes: &[u8]) -> FrameResult {
        if bytes.len() < 3 {
            return FrameResult::NotAFrame;
        }
        let mut r = Bits::new(bytes);
        if r.read_bits(11) != Some(LOAS_SYNC) {
            return FrameResult::NotAFrame;
        }
        let Some(length) = r.read_bits(13) else {
            return FrameResult::NotAFrame;
        };
        let frame_size = 3 + length as usize;
        if bytes.len() < frame_size {
            return FrameResult::Truncated;
        }

        let mut r = Bits::new(&bytes[3..frame_size]);
        let Some(use_same_mux) = r.read_flag() else {
            return FrameResult::NotAFrame;
        };
        if !use_same_mux {
            match parse_stream_mux_config(&mut r) {
                Some(config) => self.latm_config = Some(config),
                None => return FrameResult::NotAFrame,
            }
        }

        let mut record = FrameRecord::new(StreamKind::Audio);
        if let Some(config) = self.latm_config {
            fill_record(&mut record, &config, AacMux::Latm, 1);
        }
        FrameResult::Frame {
            record,
            consumed: frame_size,
        }
    }
}

fn parse_adts(bytes: &[u8]) -> FrameResult {
    if bytes.len() < 7 || bytes[0] != 0xFF || bytes[1] & 0xF6 != 0xF0 {
        return FrameResult::NotAFrame;
    }
    let profile = (bytes[2] >> 6) as u32;
    let sr_index = ((bytes[2] >> 2) & 0x0F) as usize;
    let channel_config = (((bytes[2] & 0x01) << 2) | (bytes[3] >> 6)) as u32;
    let frame_length =
        (((bytes[3] & 0x03) as usize) << 11) | ((bytes[4] as usize) << 3) | (bytes[5] as usize >> 5);
    let raw_blocks = (bytes[6] & 0x03) as u64 + 1;
    let header_size = if bytes[1] & 0x01 == 1 { 7 } else { 9 };

    if sr_index >= SAMPLE_RATES.len() || frame_length < header_size {
        return FrameResult::NotAFrame;
    }
    if bytes.len() < frame_length {
        return FrameResult::Truncated;
    }

    let config = AudioConfig {
        object_type: profile + 1,
        sample_rate: SAMPLE_RATES[sr_index],
        channel_config,
        sbr: false,
        ps: false,
    };
    let mut record = FrameRecord::new(StreamKind::Audio);
    fill_record(&mut record, &config, AacMux::Adts, raw_blocks);
    FrameResult::Frame {
        record,
        consumed: frame_length,
    }
}

fn read_object_type(r: &mut Bits) -> Option<u32> {
    let aot = r.read_bits(5)?;
    if aot == 31 {
        Some(32 + r.read_bits(6)?)
    } else {
        Some(aot)
    }
}

fn read_sample_rate(r: &mut Bits) -> Option<u32> {
    let index = r.read_bits(4)? as usize;
    if index == 0x0F {
        r.read_bits(24)
    } else {
        SAMPLE_RATES.get(index).copied()
    }
}

fn parse_audio_specific_config(r: &mut Bits) -> Option<AudioConfig> {
    let mut object_type = read_object_type(r)?;
    let mut sample_rate = read_sample_rate(r)?;
    let channel_config = r.read_bits(4)?;
    let (mut sbr, mut ps) = (false, false);
    if object_type == 5 || object_type == 29 {
        sbr = true;
        ps = object_type == 29;
        sample_rate = read_sample_rate(r)?;
        object_type = read_object_type(r)?;
    }
    Some(AudioConfig {
        object_type,
        sample_rate,
        channel_config,
        sbr,
        ps,
    })
}

/// LatmGetValue
fn latm_value(r: &mut Bits) -> Option<u32> {
    let bytes = r.read_bits(2)?;
    let mut value = 0u32;
    for _ in 0..=bytes {
        value = (value << 8) | r.read_bits(8)?;
    }
    Some(value)
}

fn parse_stream_mux_config(r: &mut Bits) -> Option<AudioConfig> {
    let version = r.read_flag()?;
    let version_a = if version { r.read_flag()? } else { false };
    if version_a {
        return None;
    }
    if version {
        latm_value(r)?; // taraBufferFullness
    }
    r.skip(1 + 6)?; // allStreamsSameTimeFraming, numSubFrames
    let num_program = r.read_bits(4)?;
    let num_layer = r.read_bits(3)?;
    if num_program != 0 || num_layer != 0 {
        // Only the first layer of the first program is described.
        tracing::trace!(num_program, num_layer, "multi-program LATM, using first layer");
    }
    if version {
        let asc_len = latm_value(r)?;
        let before = r.remaining();
        let config = parse_audio_specific_config(r)?;
        let used = (before - r.remaining()) as u32;
        r.skip(asc_len.saturating_sub(used))?;
        Some(config)
    } else {
        parse_audio_specific_config(r)
    }
}

fn channel_layout(config: u32) -> Option<(u32, &'static str)> {
    Some(match config {
        1 => (1, "C"),
        2 => (2, "L R"),
        3 => (3, "C L R"),
        4 => (4, "C L R Cs"),
        5 => (5, "C L R Ls Rs"),
        6 => (6, "C L R Ls Rs LFE"),
        7 => (8, "C L R Ls Rs Lw Rw LFE"),
        _ => return None,
    })
}

fn profile_name(config: &AudioConfig) -> &'static str {
    if config.ps {
        return "HE-AACv2";
    }
    if config.sbr {
        return "HE-AAC";
    }
    match config.object_type {
        1 => "Main",
        2 => "LC",
        3 => "SSR",
        4 => "LTP",
        _ => "AAC",
    }
}

fn fill_record(record: &mut FrameRecord, config: &AudioConfig, mux: AacMux, blocks: u64) {
    let facts = &mut record.facts;
    facts.set("Format", "AAC");
    facts.set("Format_Profile", profile_name(config));
    facts.set(
        "MuxingMode",
        match mux {
            AacMux::Adts => "ADTS",
            AacMux::Latm => "LATM",
        },
    );
    facts.set("BitRate_Mode", "VBR");
    if let Some((channels, layout)) = channel_layout(config.channel_config) {
        facts.set("Channels", channels);
        facts.set("ChannelLayout", layout);
    }
    if config.sample_rate > 0 {
        facts.set("SamplingRate", config.sample_rate);
        facts.set("SamplesPerFrame", 1024u32);
        record.duration_secs = Some((1024 * blocks) as f64 / config.sample_rate as f64);
    }
    record.frames = blocks;
}
