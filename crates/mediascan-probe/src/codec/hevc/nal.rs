//! HEVC NAL unit header

pub const SPS: u8 = 33;
pub const PREFIX_SEI: u8 = 39;
pub const SUFFIX_SEI: u8 = 40;
/// UNSPEC62, carries Dolby Vision RPUs
pub const DOVI_RPU: u8 = 62;

/// The two-byte NAL unit header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub nal_type: u8,
    pub layer_id: u8,
    pub temporal_id: u8,
}

impl NalHeader {
    pub fn parse(nal: &[u8]) -> Option<Self> {
        if nal.len() < 2 || nal[0] & 0x80 != 0 {
            return None;
        }
        let temporal_id_plus1 = nal[1] & 0x07;
        if temporal_id_plus1 == 0 {
            return None;
        }
        Some(Self {
            nal_type: (nal[0] >> 1) & 0x3F,
            layer_id: ((nal[0] & 0x01) << 5) | (nal[1] >> 3),
            temporal_id: temporal_id_plus1 - 1,
        })
    }

    /// Coded slice segment (VCL) NAL unit
    pub fn is_slice(&self) -> bool {
        self.nal_type < 32
    }
}

/// `first_slice_segment_in_pic_flag` of a slice NAL unit.
pub fn first_slice_in_picture(nal: &[u8]) -> bool {
    nal.get(2).is_some_and(|b| b & 0x80 != 0)
}
