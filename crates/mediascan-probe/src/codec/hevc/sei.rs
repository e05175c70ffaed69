//! HEVC SEI parsing, limited to the messages that carry HDR signalling

use crate::codec::bits::{unescape_rbsp, Bits};
use crate::types::{ContentLightLevel, MasteringDisplay};

/// An HDR-relevant SEI message
#[derive(Debug, Clone, PartialEq)]
pub enum SeiMessage {
    MasteringDisplay(MasteringDisplay),
    ContentLight(ContentLightLevel),
    /// ST 2094-40 dynamic metadata was present
    Hdr10Plus,
}

const USER_DATA_REGISTERED: u32 = 4;
const MASTERING_DISPLAY_COLOUR_VOLUME: u32 = 137;
const CONTENT_LIGHT_LEVEL_INFO: u32 = 144;

/// ITU-T T.35 prefix of ST 2094-40: country 0xB5, provider 0x003C,
/// oriented code 0x0001, application identifier 4.
const HDR10PLUS_PREFIX: [u8; 6] = [0xB5, 0x00, 0x3C, 0x00, 0x01, 0x04];

/// `(payloadType, payload)` pairs of one SEI RBSP.
struct Payloads<'a> {
    rbsp: &'a [u8],
}

impl<'a> Payloads<'a> {
    /// `ff_byte` run-length coding shared by payload type and size
    fn read_coded(&mut self) -> Option<usize> {
        let mut value = 0usize;
        loop {
            let (&byte, rest) = self.rbsp.split_first()?;
            self.rbsp = rest;
            value += byte as usize;
            if byte != 0xFF {
                return Some(value);
            }
        }
    }
}

impl<'a> Iterator for Payloads<'a> {
    type Item = (u32, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        // stop at rbsp_trailing_bits
        if self.rbsp.len() < 2 || self.rbsp[0] == 0x80 {
            return None;
        }
        let payload_type = self.read_coded()? as u32;
        let size = self.read_coded()?;
        if size > self.rbsp.len() {
            return None;
        }
        let (payload, rest) = self.rbsp.split_at(size);
        self.rbsp = rest;
        Some((payload_type, payload))
    }
}

/// Parse an SEI NAL unit (2-byte header included) and keep the HDR messages.
pub fn parse_sei(nal: &[u8]) -> Vec<SeiMessage> {
    let Some(body) = nal.get(2..).filter(|b| !b.is_empty()) else {
        return Vec::new();
    };
    let rbsp = unescape_rbsp(body);

    Payloads { rbsp: &rbsp }
        .filter_map(|(payload_type, payload)| match payload_type {
            MASTERING_DISPLAY_COLOUR_VOLUME => {
                mastering_display(payload).map(SeiMessage::MasteringDisplay)
            }
            CONTENT_LIGHT_LEVEL_INFO => content_light(payload).map(SeiMessage::ContentLight),
            USER_DATA_REGISTERED if payload.len() > 6 && payload.starts_with(&HDR10PLUS_PREFIX) => {
                Some(SeiMessage::Hdr10Plus)
            }
            _ => None,
        })
        .collect()
}

/// Primaries come in G, B, R order, each an (x, y) pair in 0.00002 units;
/// luminances are in 0.0001 cd/m².
fn mastering_display(payload: &[u8]) -> Option<MasteringDisplay> {
    if payload.len() < 24 {
        return None;
    }
    let mut r = Bits::new(payload);
    let mut pair = || Some([r.read_bits(16)? as u16, r.read_bits(16)? as u16]);
    let primaries = [pair()?, pair()?, pair()?];
    let white_point = pair()?;
    Some(MasteringDisplay {
        primaries,
        white_point,
        max_luminance: r.read_bits(32)?,
        min_luminance: r.read_bits(32)?,
    })
}

fn content_light(payload: &[u8]) -> Option<ContentLightLevel> {
    let mut r = Bits::new(payload);
    Some(ContentLightLevel {
        max_cll: r.read_bits(16)? as u16,
        max_fall: r.read_bits(16)? as u16,
    })
}
