//! H.264/AVC Annex-B access units: SPS with VUI, slice counting

use super::bits::{annex_b_units, unescape_rbsp, Bits};
use super::{FrameRecord, FrameResult};
use crate::types::{ColourDescription, FieldValue, StreamKind};

const NAL_SLICE: u8 = 1;
const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;

/// Parsed sequence parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct AvcSps {
    pub profile_idc: u32,
    pub level_idc: u32,
    pub chroma_format_idc: u32,
    pub bit_depth_luma: u32,
    pub width: u32,
    pub height: u32,
    pub frame_mbs_only: bool,
    pub sar: Option<(u32, u32)>,
    pub colour: Option<ColourDescription>,
    /// (num_units_in_tick, time_scale, fixed_frame_rate)
    pub timing: Option<(u32, u32, bool)>,
}

impl AvcSps {
    pub fn frame_rate(&self) -> Option<f64> {
        let (units, scale, _) = self.timing?;
        (units > 0 && scale > 0).then(|| scale as f64 / (2.0 * units as f64))
    }

    fn profile_name(&self) -> String {
        match self.profile_idc {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4 Predictive",
            44 => "CAVLC 4:4:4 Intra",
            _ => return format!("Profile {}", self.profile_idc),
        }
        .to_string()
    }

    fn apply_to(&self, record: &mut FrameRecord) {
        let facts = &mut record.facts;
        facts.set("Format", "AVC");
        facts.set(
            "Format_Profile",
            format!(
                "{}@L{}.{}",
                self.profile_name(),
                self.level_idc / 10,
                self.level_idc % 10
            ),
        );
        facts.set("Width", self.width);
        facts.set("Height", self.height);
        if let Some((w, h)) = self.sar {
            if w > 0 && h > 0 {
                let dar = self.width as f64 * w as f64 / (self.height as f64 * h as f64);
                facts.set("PixelAspectRatio", FieldValue::decimal(w as f64 / h as f64, 3));
                facts.set("DisplayAspectRatio", FieldValue::decimal(dar, 3));
            }
        }
        if let Some(rate) = self.frame_rate() {
            facts.set("FrameRate", FieldValue::decimal(rate, 3));
        }
        if let Some((_, _, fixed)) = self.timing {
            facts.set("FrameRate_Mode", if fixed { "CFR" } else { "VFR" });
        }
        facts.set(
            "ChromaSubsampling",
            match self.chroma_format_idc {
                0 => "4:0:0",
                2 => "4:2:2",
                3 => "4:4:4",
                _ => "4:2:0",
            },
        );
        facts.set("BitDepth", self.bit_depth_luma);
        facts.set(
            "ScanType",
            if self.frame_mbs_only { "Progressive" } else { "Interlaced" },
        );
        if let Some(colour) = &self.colour {
            colour.apply_to(facts);
        }
        record.key_params = true;
    }
}

#[derive(Debug, Clone, Default)]
pub struct H264Parser;

impl H264Parser {
    pub fn new() -> Self {
        Self
    }

    pub fn try_parse_frame(&mut self, bytes: &[u8], resolved: bool) -> FrameResult {
        let mut record = FrameRecord::new(StreamKind::Video);
        record.frames = 0;
        let mut any = false;
        for nal in annex_b_units(bytes) {
            any = true;
            let nal_type = nal[0] & 0x1F;
            match nal_type {
                NAL_SPS if !resolved && !record.key_params => {
                    if let Some(sps) = parse_sps(nal) {
                        sps.apply_to(&mut record);
                    }
                }
                NAL_SLICE | NAL_IDR => {
                    let rbsp = unescape_rbsp(&nal[1..nal.len().min(16)]);
                    if Bits::new(&rbsp).read_ue() == Some(0) {
                        record.frames += 1;
                    }
                }
                _ => {}
            }
        }
        if !any {
            return FrameResult::NotAFrame;
        }
        FrameResult::Frame {
            record,
            consumed: bytes.len(),
        }
    }
}

fn skip_scaling_list(r: &mut Bits, size: usize) -> Option<()> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = r.read_se()?;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Some(())
}

/// Parse an SPS NAL unit (header byte included).
pub fn parse_sps(nal: &[u8]) -> Option<AvcSps> {
    if nal.len() < 4 {
        return None;
    }
    let rbsp = unescape_rbsp(&nal[1..]);
    let mut r = Bits::new(&rbsp);
    let profile_idc = r.read_bits(8)?;
    r.skip(8)?; // constraint flags
    let level_idc = r.read_bits(8)?;
    r.read_ue()?; // seq_parameter_set_id

    let mut chroma_format_idc = 1;
    let mut bit_depth_luma = 8;
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = r.read_ue()?;
        if chroma_format_idc == 3 {
            r.skip(1)?; // separate_colour_plane_flag
        }
        bit_depth_luma = r.read_ue()? + 8;
        r.read_ue()?; // bit_depth_chroma_minus8
        r.skip(1)?; // qpprime_y_zero_transform_bypass_flag
        if r.read_flag()? {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if r.read_flag()? {
                    skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }
    r.read_ue()?; // log2_max_frame_num_minus4
    match r.read_ue()? {
        0 => {
            r.read_ue()?;
        }
        1 => {
            r.skip(1)?;
            r.read_se()?;
            r.read_se()?;
            let cycle = r.read_ue()?;
            for _ in 0..cycle {
                r.read_se()?;
            }
        }
        _ => {}
    }
    r.read_ue()?; // max_num_ref_frames
    r.skip(1)?; // gaps_in_frame_num_value_allowed_flag
    let width_mbs = r.read_ue()? + 1;
    let height_map_units = r.read_ue()? + 1;
    let frame_mbs_only = r.read_flag()?;
    if !frame_mbs_only {
        r.skip(1)?; // mb_adaptive_frame_field_flag
    }
    r.skip(1)?; // direct_8x8_inference_flag
    if width_mbs > 1024 || height_map_units > 1024 {
        return None;
    }

    let (mut crop_l, mut crop_r, mut crop_t, mut crop_b) = (0, 0, 0, 0);
    if r.read_flag()? {
        crop_l = r.read_ue()?;
        crop_r = r.read_ue()?;
        crop_t = r.read_ue()?;
        crop_b = r.read_ue()?;
        if crop_l.max(crop_r).max(crop_t).max(crop_b) > 8192 {
            return None;
        }
    }
    let field_factor = if frame_mbs_only { 1 } else { 2 };
    let (crop_unit_x, crop_unit_y) = match chroma_format_idc {
        0 | 3 => (1, field_factor),
        2 => (2, field_factor),
        _ => (2, 2 * field_factor),
    };
    let width = (width_mbs * 16).checked_sub((crop_l + crop_r) * crop_unit_x)?;
    let height =
        (field_factor * height_map_units * 16).checked_sub((crop_t + crop_b) * crop_unit_y)?;

    let mut sps = AvcSps {
        profile_idc,
        level_idc,
        chroma_format_idc,
        bit_depth_luma,
        width,
        height,
        frame_mbs_only,
        sar: None,
        colour: None,
        timing: None,
    };
    if r.read_flag().unwrap_or(false) {
        // A truncated VUI still leaves the core SPS usable.
        let _ = parse_vui(&mut r, &mut sps);
    }
    Some(sps)
}

/// Sample aspect ratios by aspect_ratio_idc (1..=16).
const SAR_TABLE: [(u32, u32); 17] = [
    (0, 0),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

fn parse_vui(r: &mut Bits, sps: &mut AvcSps) -> Option<()> {
    if r.read_flag()? {
        let idc = r.read_bits(8)? as usize;
        sps.sar = if idc == 255 {
            Some((r.read_bits(16)?, r.read_bits(16)?))
        } else {
            SAR_TABLE.get(idc).copied().filter(|&(w, _)| w > 0)
        };
    }
    if r.read_flag()? {
        r.skip(1)?; // overscan_appropriate_flag
    }
    if r.read_flag()? {
        r.skip(3)?; // video_format
        let full_range = r.read_flag()?;
        let mut colour = ColourDescription {
            primaries: 2,
            transfer: 2,
            matrix: 2,
            full_range,
        };
        if r.read_flag()? {
            colour.primaries = r.read_bits(8)? as u8;
            colour.transfer = r.read_bits(8)? as u8;
            colour.matrix = r.read_bits(8)? as u8;
        }
        sps.colour = Some(colour);
    }
    if r.read_flag()? {
        r.read_ue()?;
        r.read_ue()?;
    }
    if r.read_flag()? {
        let units = r.read_bits(32)?;
        let scale = r.read_bits(32)?;
        let fixed = r.read_flag()?;
        sps.timing = Some((units, scale, fixed));
    }
    Some(())
}
