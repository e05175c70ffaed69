//! HEVC (H.265) codec parsing
//!
//! Extracts stream parameters from the SPS and HDR signalling from SEI
//! messages and Dolby Vision RPUs, either from an Annex-B byte stream
//! ([`HevcParser`]) or from an `hvcC` decoder configuration record
//! ([`parse_hevc_config`]).

mod nal;
mod sei;
mod sps;

pub use nal::NalHeader;
pub use sei::{parse_sei, SeiMessage};
pub use sps::{parse_sps, Sps, Vui};

use super::bits::{annex_b_units, find_start_code};
use super::{FrameRecord, FrameResult};
use crate::hdr::{dolby_vision, HdrSignals};
use crate::types::{HdrFormat, StreamKind, StreamRecord};

/// Annex-B access unit parser
#[derive(Debug, Clone, Default)]
pub struct HevcParser {
    signals: HdrSignals,
}

impl HevcParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed Dolby Vision signalling from a configuration record found
    /// outside the bitstream (e.g. a DOVI descriptor).
    pub fn set_dolby_vision_config(&mut self, config: HdrFormat) {
        self.signals.dolby_vision =
            dolby_vision::merge(Some(config), self.signals.dolby_vision.take());
    }

    pub fn try_parse_frame(&mut self, bytes: &[u8], resolved: bool) -> FrameResult {
        if find_start_code(bytes, 0).is_none() {
            return FrameResult::NotAFrame;
        }
        let mut record = FrameRecord::new(StreamKind::Video);
        record.frames = 0;

        for unit in annex_b_units(bytes) {
            let Some(header) = NalHeader::parse(unit) else {
                continue;
            };
            if header.layer_id != 0 {
                continue;
            }
            match header.nal_type {
                _ if header.is_slice() => {
                    if nal::first_slice_in_picture(unit) {
                        record.frames += 1;
                    }
                }
                nal::SPS if !resolved && !record.key_params => {
                    if let Some(sps) = parse_sps(unit) {
                        sps.apply_to(&mut record.facts);
                        if let Some(colour) = sps.vui.as_ref().and_then(|v| v.colour) {
                            self.signals.colour = Some(colour);
                        }
                        record.key_params = true;
                    }
                }
                nal::PREFIX_SEI | nal::SUFFIX_SEI if !resolved => {
                    absorb_sei(&mut self.signals, unit);
                }
                nal::DOVI_RPU if !resolved => {
                    if let Some(rpu) = dolby_vision::parse_rpu(unit) {
                        self.signals.dolby_vision =
                            dolby_vision::merge(self.signals.dolby_vision.take(), Some(rpu));
                    }
                }
                _ => {}
            }
        }

        if record.key_params {
            if let Some(hdr) = self.signals.classify() {
                hdr.apply_to(&mut record.facts);
            }
        }
        FrameResult::Frame {
            record,
            consumed: bytes.len(),
        }
    }
}

fn absorb_sei(signals: &mut HdrSignals, nal: &[u8]) {
    for message in parse_sei(nal) {
        match message {
            SeiMessage::MasteringDisplay(md) => signals.mastering_display = Some(md),
            SeiMessage::ContentLight(cll) => signals.content_light_level = Some(cll),
            SeiMessage::Hdr10Plus => signals.hdr10plus = true,
        }
    }
}

/// HEVC stream information from a decoder configuration record
#[derive(Debug, Clone, Default)]
pub struct HevcInfo {
    pub sps: Option<Sps>,
    pub profile_idc: u8,
    pub level_idc: u8,
    pub bit_depth_luma: u8,
    pub signals: HdrSignals,
}

impl HevcInfo {
    /// Write stream and HDR facts into a video record.
    pub fn apply_to(&self, facts: &mut StreamRecord) {
        match &self.sps {
            Some(sps) => sps.apply_to(facts),
            None => {
                facts.set("Format", "HEVC");
                facts.set("BitDepth", self.bit_depth_luma);
            }
        }
        if let Some(hdr) = self.signals.classify() {
            hdr.apply_to(facts);
        }
    }
}

/// Parse an HEVCDecoderConfigurationRecord (MP4 `hvcC`, Matroska CodecPrivate).
///
/// Layout of the fixed 23-byte prefix:
/// - configurationVersion (8)
/// - general_profile_space (2), general_tier_flag (1), general_profile_idc (5)
/// - general_profile_compatibility_flags (32)
/// - general_constraint_indicator_flags (48)
/// - general_level_idc (8)
/// - min_spatial_segmentation_idc, parallelismType, chromaFormat (32)
/// - bitDepthLumaMinus8, bitDepthChromaMinus8 (16)
/// - avgFrameRate (16), framing flags (8)
/// - numOfArrays (8)
pub fn parse_hevc_config(data: &[u8]) -> Option<HevcInfo> {
    if data.len() < 23 || data[0] != 1 {
        return None;
    }

    let mut info = HevcInfo {
        profile_idc: data[1] & 0x1F,
        level_idc: data[12],
        bit_depth_luma: (data[17] & 0x07) + 8,
        ..Default::default()
    };
    let num_arrays = data[22];
    let mut pos = 23;

    for _ in 0..num_arrays {
        if pos + 3 > data.len() {
            break;
        }
        let nal_type = data[pos] & 0x3F;
        let num_nalus = u16::from_be_bytes([data[pos + 1], data[pos + 2]]) as usize;
        pos += 3;

        for _ in 0..num_nalus {
            if pos + 2 > data.len() {
                break;
            }
            let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
            pos += 2;
            let Some(unit) = data.get(pos..pos + len) else {
                break;
            };
            pos += len;

            match nal_type {
                nal::SPS if info.sps.is_none() => {
                    info.sps = parse_sps(unit);
                    info.signals.colour = info
                        .sps
                        .as_ref()
                        .and_then(|s| s.vui.as_ref())
                        .and_then(|v| v.colour);
                }
                nal::PREFIX_SEI | nal::SUFFIX_SEI => absorb_sei(&mut info.signals, unit),
                nal::DOVI_RPU => {
                    info.signals.dolby_vision = dolby_vision::parse_rpu(unit);
                }
                _ => {}
            }
        }
    }

    Some(info)
}
