//! Dolby Vision configuration records and RPU NAL units

use dolby_vision::rpu::dovi_rpu::DoviRpu;

use crate::types::HdrFormat;

/// Detect Dolby Vision from codec private data: a configuration record
/// first, then an RPU.
pub fn detect_dolby_vision(codec_private: &[u8]) -> Option<HdrFormat> {
    parse_dv_config(codec_private).or_else(|| parse_rpu(codec_private))
}

/// Parse a Dolby Vision configuration record.
///
/// The same layout is used by the `dvcC`/`dvvC`/`dvwC` boxes, the Matroska
/// block addition mapping and the body of the MPEG-TS DOVI video stream
/// descriptor (tag 0xB0):
/// - dv_version_major (8 bits)
/// - dv_version_minor (8 bits)
/// - dv_profile (7 bits)
/// - dv_level (6 bits)
/// - rpu_present_flag (1 bit)
/// - el_present_flag (1 bit)
/// - bl_present_flag (1 bit)
/// - dv_bl_signal_compatibility_id (4 bits), when present
pub fn parse_dv_config(data: &[u8]) -> Option<HdrFormat> {
    let config = if data.len() >= 8 && matches!(&data[4..8], b"dvcC" | b"dvvC" | b"dvwC") {
        &data[8..]
    } else {
        data
    };
    if config.len() < 4 || config[0] == 0 {
        return None;
    }

    let profile = (config[2] >> 1) & 0x7F;
    let level = ((config[2] & 0x01) << 5) | ((config[3] >> 3) & 0x1F);
    if profile > 10 || level > 13 {
        return None;
    }

    Some(HdrFormat::DolbyVision {
        profile,
        level: Some(level),
        bl_compatibility_id: config.get(4).map(|b| b >> 4),
        rpu_present: config[3] & 0x04 != 0,
        el_present: config[3] & 0x02 != 0,
    })
}

/// Parse a Dolby Vision RPU carried in an HEVC UNSPEC62 NAL unit.
pub fn parse_rpu(nal: &[u8]) -> Option<HdrFormat> {
    if nal.len() <= 2 {
        return None;
    }
    let payload = if (nal[0] >> 1) & 0x3F == 62 {
        &nal[2..]
    } else {
        nal
    };

    let rpu = DoviRpu::parse_rpu(payload).ok()?;
    let profile = rpu.dovi_profile;
    // Profile 5 has no backwards compatible base layer; 7 and 8.1 carry HDR10.
    let bl_compatibility_id = match profile {
        5 => Some(0),
        7 | 8 => Some(1),
        _ => None,
    };
    Some(HdrFormat::DolbyVision {
        profile,
        level: None,
        bl_compatibility_id,
        rpu_present: true,
        el_present: rpu.el_type.is_some(),
    })
}

/// Merge an RPU-derived description into one from a configuration record;
/// the configuration record is authoritative for level and compatibility.
pub fn merge(config: Option<HdrFormat>, rpu: Option<HdrFormat>) -> Option<HdrFormat> {
    match (config, rpu) {
        (
            Some(HdrFormat::DolbyVision {
                profile,
                level,
                bl_compatibility_id,
                el_present,
                ..
            }),
            Some(HdrFormat::DolbyVision {
                el_present: rpu_el, ..
            }),
        ) => Some(HdrFormat::DolbyVision {
            profile,
            level,
            bl_compatibility_id,
            rpu_present: true,
            el_present: el_present || rpu_el,
        }),
        (config, rpu) => config.or(rpu),
    }
}
