//! HDR format detection
//!
//! Signals arrive from several places (VUI transfer characteristics, SEI
//! messages, Dolby Vision configuration records and RPUs) and are only
//! classified once a stream has been looked at.

pub mod dolby_vision;

pub use dolby_vision::detect_dolby_vision;

use crate::types::{ColourDescription, ContentLightLevel, HdrFormat, MasteringDisplay};

/// HDR signalling collected for one video stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HdrSignals {
    pub colour: Option<ColourDescription>,
    pub mastering_display: Option<MasteringDisplay>,
    pub content_light_level: Option<ContentLightLevel>,
    pub hdr10plus: bool,
    pub dolby_vision: Option<HdrFormat>,
}

impl HdrSignals {
    /// Classify, most specific first: Dolby Vision, HDR10+, PQ, HLG.
    ///
    /// Returns `None` when nothing at all is known; SDR requires a colour
    /// description that says so.
    pub fn classify(&self) -> Option<HdrFormat> {
        if let Some(dv) = &self.dolby_vision {
            return Some(dv.clone());
        }
        if self.hdr10plus {
            return Some(HdrFormat::Hdr10Plus {
                mastering_display: self.mastering_display.clone(),
                content_light_level: self.content_light_level.clone(),
            });
        }
        match self.colour.map(|c| c.transfer) {
            Some(16) => Some(HdrFormat::Hdr10 {
                mastering_display: self.mastering_display.clone(),
                content_light_level: self.content_light_level.clone(),
            }),
            Some(18) => Some(HdrFormat::Hlg),
            Some(_) => Some(HdrFormat::Sdr),
            None if self.mastering_display.is_some() => Some(HdrFormat::Hdr10 {
                mastering_display: self.mastering_display.clone(),
                content_light_level: self.content_light_level.clone(),
            }),
            None => None,
        }
    }
}
