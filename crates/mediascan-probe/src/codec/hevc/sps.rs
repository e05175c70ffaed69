//! HEVC Sequence Parameter Set parsing

use crate::codec::bits::{unescape_rbsp, Bits};
use crate::types::{ColourDescription, FieldValue, StreamRecord};

/// Parsed SPS fields relevant to stream description
#[derive(Debug, Clone, PartialEq)]
pub struct Sps {
    pub profile_idc: u8,
    pub high_tier: bool,
    pub level_idc: u8,
    pub chroma_format_idc: u32,
    pub width: u32,
    pub height: u32,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub vui: Option<Vui>,
}

/// Video Usability Information
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vui {
    pub sar: Option<(u32, u32)>,
    pub colour: Option<ColourDescription>,
    pub field_seq: bool,
    /// (num_units_in_tick, time_scale)
    pub timing: Option<(u32, u32)>,
}

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

impl Sps {
    pub fn profile_name(&self) -> &'static str {
        match self.profile_idc {
            1 => "Main",
            2 => "Main 10",
            3 => "Main Still",
            4 => "Format Range",
            5 => "High Throughput",
            9 => "Screen Content",
            _ => "Unknown",
        }
    }

    pub fn frame_rate(&self) -> Option<f64> {
        let (units, scale) = self.vui.as_ref()?.timing?;
        (units > 0 && scale > 0).then(|| scale as f64 / units as f64)
    }

    /// Write the stream facts carried by this SPS.
    pub fn apply_to(&self, facts: &mut StreamRecord) {
        facts.set("Format", "HEVC");
        let level = self.level_idc as f64 / 30.0;
        let level = if self.level_idc % 30 == 0 {
            format!("{}", self.level_idc / 30)
        } else {
            format!("{:.1}", level)
        };
        facts.set(
            "Format_Profile",
            format!(
                "{}@L{}@{}",
                self.profile_name(),
                level,
                if self.high_tier { "High" } else { "Main" }
            ),
        );
        facts.set("Width", self.width);
        facts.set("Height", self.height);
        if let Some((sar_w, sar_h)) = self.vui.as_ref().and_then(|v| v.sar) {
            if sar_w > 0 && sar_h > 0 && self.height > 0 {
                let par = sar_w as f64 / sar_h as f64;
                facts.set("PixelAspectRatio", FieldValue::decimal(par, 3));
                facts.set(
                    "DisplayAspectRatio",
                    FieldValue::decimal(self.width as f64 * par / self.height as f64, 3),
                );
            }
        }
        if let Some(rate) = self.frame_rate() {
            facts.set("FrameRate", FieldValue::decimal(rate, 3));
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
        let interlaced = self.vui.as_ref().is_some_and(|v| v.field_seq);
        facts.set(
            "ScanType",
            if interlaced { "Interlaced" } else { "Progressive" },
        );
        if let Some(colour) = self.vui.as_ref().and_then(|v| v.colour) {
            colour.apply_to(facts);
        }
    }
}

/// Parse an SPS NAL unit (2-byte header included, emulation prevention intact).
pub fn parse_sps(nal: &[u8]) -> Option<Sps> {
    if nal.len() < 4 {
        return None;
    }
    let rbsp = unescape_rbsp(&nal[2..]);
    let mut r = Bits::new(&rbsp);

    r.skip(4)?; // sps_video_parameter_set_id
    let max_sub_layers_minus1 = r.read_bits(3)?;
    r.skip(1)?; // sps_temporal_id_nesting_flag

    let (profile_idc, high_tier, level_idc) = profile_tier_level(&mut r, max_sub_layers_minus1)?;

    r.read_ue()?; // sps_seq_parameter_set_id
    let chroma_format_idc = r.read_ue()?;
    if chroma_format_idc > 3 {
        return None;
    }
    if chroma_format_idc == 3 {
        r.skip(1)?; // separate_colour_plane_flag
    }
    let mut width = r.read_ue()?;
    let mut height = r.read_ue()?;
    if width == 0 || height == 0 || width > 16384 || height > 16384 {
        return None;
    }
    if r.read_flag()? {
        let (sub_w, sub_h) = match chroma_format_idc {
            1 => (2, 2),
            2 => (2, 1),
            _ => (1, 1),
        };
        let left = r.read_ue()?.min(8192);
        let right = r.read_ue()?.min(8192);
        let top = r.read_ue()?.min(8192);
        let bottom = r.read_ue()?.min(8192);
        width = width.saturating_sub(sub_w * (left + right));
        height = height.saturating_sub(sub_h * (top + bottom));
    }
    let bit_depth_luma = (r.read_ue()?.min(8) + 8) as u8;
    let bit_depth_chroma = (r.read_ue()?.min(8) + 8) as u8;
    let log2_max_poc_lsb = r.read_ue()? + 4;
    if log2_max_poc_lsb > 16 {
        return None;
    }

    let ordering_info_present = r.read_flag()?;
    let start = if ordering_info_present {
        0
    } else {
        max_sub_layers_minus1
    };
    for _ in start..=max_sub_layers_minus1 {
        r.read_ue()?; // sps_max_dec_pic_buffering_minus1
        r.read_ue()?; // sps_max_num_reorder_pics
        r.read_ue()?; // sps_max_latency_increase_plus1
    }

    // coding / transform block sizes and hierarchy depths
    for _ in 0..6 {
        r.read_ue()?;
    }

    if r.read_flag()? && r.read_flag()? {
        skip_scaling_list_data(&mut r)?;
    }

    r.skip(2)?; // amp_enabled_flag, sample_adaptive_offset_enabled_flag
    if r.read_flag()? {
        r.skip(8)?; // pcm sample bit depths
        r.read_ue()?;
        r.read_ue()?;
        r.skip(1)?; // pcm_loop_filter_disabled_flag
    }

    let num_short_term_ref_pic_sets = r.read_ue()?;
    if num_short_term_ref_pic_sets > 64 {
        return None;
    }
    let mut delta_pocs: Vec<u32> = Vec::with_capacity(num_short_term_ref_pic_sets as usize);
    for idx in 0..num_short_term_ref_pic_sets as usize {
        let count = short_term_ref_pic_set(&mut r, idx, &delta_pocs)?;
        delta_pocs.push(count);
    }

    if r.read_flag()? {
        let num_long_term = r.read_ue()?;
        if num_long_term > 32 {
            return None;
        }
        for _ in 0..num_long_term {
            r.skip(log2_max_poc_lsb)?; // lt_ref_pic_poc_lsb_sps
            r.skip(1)?; // used_by_curr_pic_lt_sps_flag
        }
    }

    r.skip(2)?; // sps_temporal_mvp_enabled_flag, strong_intra_smoothing_enabled_flag

    // A truncated VUI still leaves the core parameters usable.
    let vui = match r.read_flag() {
        Some(true) => parse_vui(&mut r),
        _ => None,
    };

    Some(Sps {
        profile_idc,
        high_tier,
        level_idc,
        chroma_format_idc,
        width,
        height,
        bit_depth_luma,
        bit_depth_chroma,
        vui,
    })
}

/// Returns (general_profile_idc, general_tier_flag, general_level_idc).
fn profile_tier_level(r: &mut Bits<'_>, max_sub_layers_minus1: u32) -> Option<(u8, bool, u8)> {
    r.skip(2)?; // general_profile_space
    let high_tier = r.read_flag()?;
    let profile_idc = r.read_bits(5)? as u8;
    r.skip(32)?; // general_profile_compatibility_flags
    r.skip(4 + 43 + 1)?; // source flags, constraint flags, inbld/reserved
    let level_idc = r.read_bits(8)? as u8;

    let mut profile_present = [false; 8];
    let mut level_present = [false; 8];
    for i in 0..max_sub_layers_minus1 as usize {
        profile_present[i] = r.read_flag()?;
        level_present[i] = r.read_flag()?;
    }
    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            r.skip(2)?; // reserved_zero_2bits
        }
    }
    for i in 0..max_sub_layers_minus1 as usize {
        if profile_present[i] {
            r.skip(88)?;
        }
        if level_present[i] {
            r.skip(8)?;
        }
    }
    Some((profile_idc, high_tier, level_idc))
}

fn skip_scaling_list_data(r: &mut Bits<'_>) -> Option<()> {
    for size_id in 0..4u32 {
        let step = if size_id == 3 { 3 } else { 1 };
        let mut matrix_id = 0;
        while matrix_id < 6 {
            if !r.read_flag()? {
                r.read_ue()?; // scaling_list_pred_matrix_id_delta
            } else {
                let coef_num = 64.min(1u32 << (4 + (size_id << 1)));
                if size_id > 1 {
                    r.read_se()?; // scaling_list_dc_coef_minus8
                }
                for _ in 0..coef_num {
                    r.read_se()?;
                }
            }
            matrix_id += step;
        }
    }
    Some(())
}

/// Skip one st_ref_pic_set and return its NumDeltaPocs.
fn short_term_ref_pic_set(r: &mut Bits<'_>, idx: usize, previous: &[u32]) -> Option<u32> {
    let inter_rps_pred = idx != 0 && r.read_flag()?;
    if inter_rps_pred {
        r.skip(1)?; // delta_rps_sign
        r.read_ue()?; // abs_delta_rps_minus1
        let reference = *previous.get(idx - 1)?;
        let mut count = 0;
        for _ in 0..=reference {
            let used_by_curr_pic = r.read_flag()?;
            let use_delta = used_by_curr_pic || r.read_flag()?;
            if use_delta {
                count += 1;
            }
        }
        Some(count)
    } else {
        let negative = r.read_ue()?;
        let positive = r.read_ue()?;
        if negative > 16 || positive > 16 {
            return None;
        }
        for _ in 0..negative + positive {
            r.read_ue()?; // delta_poc_minus1
            r.skip(1)?; // used_by_curr_pic_flag
        }
        Some(negative + positive)
    }
}

fn parse_vui(r: &mut Bits<'_>) -> Option<Vui> {
    let mut vui = Vui::default();

    if r.read_flag()? {
        let idc = r.read_bits(8)? as usize;
        vui.sar = if idc == 255 {
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
        if r.read_flag()? {
            vui.colour = Some(ColourDescription {
                primaries: r.read_bits(8)? as u8,
                transfer: r.read_bits(8)? as u8,
                matrix: r.read_bits(8)? as u8,
                full_range,
            });
        }
    }
    if r.read_flag()? {
        r.read_ue()?;
        r.read_ue()?;
    }
    r.skip(1)?; // neutral_chroma_indication_flag
    vui.field_seq = r.read_flag()?;
    r.skip(1)?; // frame_field_info_present_flag
    if r.read_flag()? {
        for _ in 0..4 {
            r.read_ue()?; // default display window offsets
        }
    }
    if r.read_flag()? {
        let units = r.read_bits(32)?;
        let scale = r.read_bits(32)?;
        vui.timing = Some((units, scale));
    }
    Some(vui)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::bits::escape_rbsp;
    use bitstream_io::{BigEndian, BitWrite, BitWriter};

    fn write_ue<W: BitWrite>(w: &mut W, value: u32) {
        let v = value + 1;
        let len = 32 - v.leading_zeros();
        if len > 1 {
            w.write(len - 1, 0u32).unwrap();
        }
        w.write(len, v).unwrap();
    }

    /// A Main 10 3840x2160 SPS with PQ/BT.2020 colour and 24000/1001 timing.
    pub(crate) fn sps_nal() -> Vec<u8> {
        let mut w = BitWriter::endian(Vec::new(), BigEndian);
        w.write(4, 0u32).unwrap(); // vps id
        w.write(3, 0u32).unwrap(); // max_sub_layers_minus1
        w.write_bit(true).unwrap();
        // profile_tier_level
        w.write(2, 0u32).unwrap();
        w.write_bit(false).unwrap(); // main tier
        w.write(5, 2u32).unwrap(); // Main 10
        w.write(32, 0x2000_0000u32).unwrap();
        w.write(32, 0x9000_0000u32).unwrap();
        w.write(16, 0u32).unwrap();
        w.write(8, 153u32).unwrap(); // level 5.1
        write_ue(&mut w, 0); // sps id
        write_ue(&mut w, 1); // 4:2:0
        write_ue(&mut w, 3840);
        write_ue(&mut w, 2160);
        w.write_bit(false).unwrap(); // conformance window
        write_ue(&mut w, 2); // bit depth luma 10
        write_ue(&mut w, 2);
        write_ue(&mut w, 4); // log2_max_poc_lsb 8
        w.write_bit(true).unwrap();
        write_ue(&mut w, 4);
        write_ue(&mut w, 2);
        write_ue(&mut w, 0);
        for v in [0, 3, 0, 3, 0, 0] {
            write_ue(&mut w, v);
        }
        w.write_bit(false).unwrap(); // scaling lists
        w.write_bit(true).unwrap(); // amp
        w.write_bit(true).unwrap(); // sao
        w.write_bit(false).unwrap(); // pcm
        write_ue(&mut w, 2); // two short-term sets
        write_ue(&mut w, 1); // set 0: one negative
        write_ue(&mut w, 0);
        write_ue(&mut w, 0);
        w.write_bit(true).unwrap();
        w.write_bit(true).unwrap(); // set 1: inter predicted
        w.write_bit(false).unwrap();
        write_ue(&mut w, 0);
        w.write_bit(true).unwrap(); // j = 0 used
        w.write_bit(false).unwrap(); // j = 1 not used
        w.write_bit(true).unwrap(); // use_delta_flag
        w.write_bit(false).unwrap(); // long-term
        w.write_bit(true).unwrap();
        w.write_bit(true).unwrap();
        w.write_bit(true).unwrap(); // vui
        w.write_bit(true).unwrap(); // aspect ratio
        w.write(8, 1u32).unwrap();
        w.write_bit(false).unwrap(); // overscan
        w.write_bit(true).unwrap(); // video signal
        w.write(3, 5u32).unwrap();
        w.write_bit(false).unwrap();
        w.write_bit(true).unwrap();
        w.write(8, 9u32).unwrap();
        w.write(8, 16u32).unwrap();
        w.write(8, 9u32).unwrap();
        w.write_bit(false).unwrap(); // chroma loc
        w.write_bit(false).unwrap();
        w.write_bit(false).unwrap(); // field_seq
        w.write_bit(false).unwrap();
        w.write_bit(false).unwrap(); // default display window
        w.write_bit(true).unwrap(); // timing
        w.write(32, 1001u32).unwrap();
        w.write(32, 24000u32).unwrap();
        w.write_bit(false).unwrap();
        w.write_bit(false).unwrap(); // hrd
        w.write_bit(false).unwrap(); // bitstream restriction
        w.write_bit(false).unwrap(); // sps_extension
        w.write_bit(true).unwrap(); // rbsp stop bit
        w.byte_align().unwrap();
        let mut nal = vec![0x42, 0x01];
        nal.extend(escape_rbsp(&w.into_writer()));
        nal
    }

    #[test]
    fn test_parse_sps() {
        let sps = parse_sps(&sps_nal()).unwrap();
        assert_eq!(sps.width, 3840);
        assert_eq!(sps.height, 2160);
        assert_eq!(sps.bit_depth_luma, 10);
        assert_eq!(sps.profile_name(), "Main 10");
        let vui = sps.vui.clone().unwrap();
        assert_eq!(vui.colour.unwrap().transfer, 16);
        assert!((sps.frame_rate().unwrap() - 23.976).abs() < 0.001);

        let mut facts = StreamRecord::new(crate::types::StreamKind::Video);
        sps.apply_to(&mut facts);
        assert_eq!(facts.field("Format_Profile"), Some("Main 10@L5.1@Main"));
        assert_eq!(facts.field("FrameRate"), Some("23.976"));
        assert_eq!(facts.field("transfer_characteristics"), Some("PQ"));
    }

    #[test]
    fn test_truncated_sps() {
        let nal = sps_nal();
        assert!(parse_sps(&nal[..8]).is_none());
    }
}
