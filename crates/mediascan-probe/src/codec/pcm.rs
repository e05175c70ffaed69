//! Blu-ray (HDMV) LPCM: a 4-byte header in front of every PES payload

use super::{FrameRecord, FrameResult};
use crate::types::StreamKind;

#[derive(Debug, Clone, Default)]
pub struct PcmParser;

/// (channels, layout) by channel_assignment.
fn channel_assignment(code: u8) -> Option<(u32, &'static str)> {
    Some(match code {
        1 => (1, "C"),
        3 => (2, "L R"),
        4 => (3, "L R C"),
        5 => (3, "L R S"),
        6 => (4, "L R C S"),
        7 => (4, "L R Ls Rs"),
        8 => (5, "L R C Ls Rs"),
        9 => (6, "L R C Ls Rs LFE"),
        10 => (7, "L R C Ls Rs Lb Rb"),
        11 => (8, "L R C Ls Rs Lb Rb LFE"),
        _ => return None,
    })
}

impl PcmParser {
    pub fn new() -> Self {
        Self
    }

    /// One PES payload is one frame: header plus `audio_data_payload_size` bytes.
    pub fn try_parse_frame(&mut self, bytes: &[u8]) -> FrameResult {
        if bytes.len() < 4 {
            return FrameResult::NotAFrame;
        }
        let payload_size = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        let Some((channels, layout)) = channel_assignment(bytes[2] >> 4) else {
            return FrameResult::NotAFrame;
        };
        let sample_rate = match bytes[2] & 0x0F {
            1 => 48000,
            4 => 96000,
            5 => 192000,
            _ => return FrameResult::NotAFrame,
        };
        let bit_depth: u32 = match bytes[3] >> 6 {
            1 => 16,
            2 => 20,
            3 => 24,
            _ => return FrameResult::NotAFrame,
        };
        let frame_size = 4 + payload_size;
        if bytes.len() < frame_size {
            return FrameResult::Truncated;
        }

        // Odd channel counts are padded to an even number of coded channels.
        let coded_channels = (channels + 1) & !1;
        let container_bytes = if bit_depth == 16 { 2 } else { 3 };
        let samples = payload_size as u32 / (coded_channels * container_bytes);

        let mut record = FrameRecord::new(StreamKind::Audio);
        let facts = &mut record.facts;
        facts.set("Format", "PCM");
        facts.set("MuxingMode", "Blu-ray");
        facts.set("BitRate_Mode", "CBR");
        facts.set("Channels", channels);
        facts.set("ChannelLayout", layout);
        facts.set("SamplingRate", sample_rate);
        facts.set("BitDepth", bit_depth);
        facts.set("BitRate", channels * sample_rate * bit_depth);
        if samples > 0 {
            record.duration_secs = Some(samples as f64 / sample_rate as f64);
        }
        FrameResult::Frame {
            record,
            consumed: frame_size,
        }
    }
}
