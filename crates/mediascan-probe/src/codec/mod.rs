//! Codec bitstream collaborators
//!
//! Each parser understands one elementary stream format and answers a single
//! question: does a frame start at the front of this buffer, and if so, what
//! does it say and how many bytes does it occupy. The demuxer never looks at
//! codec bit layouts itself; it only talks to [`FrameParser`].

pub mod aac;
pub mod ac3;
pub mod bits;
pub mod dts;
pub mod h264;
pub mod hevc;
pub mod mpeg2;
pub mod pcm;
pub mod vc1;

use crate::types::{StreamKind, StreamRecord};

use aac::{AacMux, AacParser};
use ac3::Ac3Parser;
use dts::DtsParser;
use h264::H264Parser;
use hevc::HevcParser;
use mpeg2::Mpeg2VideoParser;
use pcm::PcmParser;
use vc1::Vc1Parser;

/// What a single decoded frame (or access unit) contributed.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Stream-level facts. The first frame seeds the stream's facts; later
    /// frames only fill fields that are still missing.
    pub facts: StreamRecord,
    /// Per-frame scalar values folded into statistics (e.g. `dialnorm`)
    pub metrics: Vec<(&'static str, f64)>,
    /// Coded frames in this record
    pub frames: u64,
    /// Presentation duration of this record, when the codec defines one
    pub duration_secs: Option<f64>,
    /// Sequence-level parameters were decoded
    pub key_params: bool,
}

impl FrameRecord {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            facts: StreamRecord::new(kind),
            metrics: Vec::new(),
            frames: 1,
            duration_secs: None,
            key_params: false,
        }
    }
}

/// Outcome of asking a parser about the front of a buffer.
#[derive(Debug, Clone)]
pub enum FrameResult {
    /// A frame was decoded from `bytes[..consumed]`
    Frame { record: FrameRecord, consumed: usize },
    /// No frame starts here
    NotAFrame,
    /// A valid header whose frame extends past the available bytes
    Truncated,
}

/// Closed set of frame parsers.
#[derive(Debug, Clone)]
pub enum FrameParser {
    Ac3(Ac3Parser),
    Aac(AacParser),
    Dts(DtsParser),
    H264(H264Parser),
    Hevc(HevcParser),
    Vc1(Vc1Parser),
    Mpeg2(Mpeg2VideoParser),
    Pcm(PcmParser),
}

impl FrameParser {
    /// Try to decode a frame at the front of `bytes`.
    ///
    /// `resolved` tells video parsers that sequence-level facts are already
    /// known so they can skip re-parsing parameter sets. Audio parsers
    /// ignore it.
    pub fn try_parse_frame(&mut self, bytes: &[u8], resolved: bool) -> FrameResult {
        match self {
            FrameParser::Ac3(p) => p.try_parse_frame(bytes),
            FrameParser::Aac(p) => p.try_parse_frame(bytes),
            FrameParser::Dts(p) => p.try_parse_frame(bytes),
            FrameParser::H264(p) => p.try_parse_frame(bytes, resolved),
            FrameParser::Hevc(p) => p.try_parse_frame(bytes, resolved),
            FrameParser::Vc1(p) => p.try_parse_frame(bytes, resolved),
            FrameParser::Mpeg2(p) => p.try_parse_frame(bytes, resolved),
            FrameParser::Pcm(p) => p.try_parse_frame(bytes),
        }
    }

    /// Whether a plausible frame header starts at the front of `bytes`.
    ///
    /// Video and PCM payloads are consumed whole, so any offset qualifies.
    pub fn is_sync(&self, bytes: &[u8]) -> bool {
        match self {
            FrameParser::Ac3(p) => p.is_sync(bytes),
            FrameParser::Aac(p) => p.is_sync(bytes),
            FrameParser::Dts(p) => p.is_sync(bytes),
            _ => true,
        }
    }

    /// Length of the sync word `is_sync` looks for.
    pub fn sync_len(&self) -> usize {
        match self {
            FrameParser::Ac3(_) | FrameParser::Aac(_) => 2,
            FrameParser::Dts(_) => 4,
            _ => 0,
        }
    }

    /// Offset of the next candidate sync word in `bytes`.
    pub fn find_sync(&self, bytes: &[u8]) -> Option<usize> {
        match self {
            FrameParser::Ac3(p) => p.find_sync(bytes),
            FrameParser::Aac(p) => p.find_sync(bytes),
            FrameParser::Dts(p) => p.find_sync(bytes),
            _ => (!bytes.is_empty()).then_some(0),
        }
    }

    /// Payloads for this parser are handed over one PES unit at a time and
    /// never split across frames.
    pub fn frame_aligned(&self) -> bool {
        matches!(
            self,
            FrameParser::H264(_)
                | FrameParser::Hevc(_)
                | FrameParser::Vc1(_)
                | FrameParser::Mpeg2(_)
                | FrameParser::Pcm(_)
        )
    }
}

/// Elementary stream format, as declared by a PMT entry or sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecFormat {
    Mpeg1Video,
    Mpeg2Video,
    H264,
    Hevc,
    Vc1,
    Ac3,
    Eac3,
    TrueHd,
    AacAdts,
    AacLatm,
    Dts,
    DtsHd,
    MpegAudio,
    Lpcm,
    Pgs,
    Igs,
    TextSubtitle,
    DvbSubtitle,
    Teletext,
    Unknown,
}

impl CodecFormat {
    pub fn kind(self) -> StreamKind {
        match self {
            CodecFormat::Mpeg1Video
            | CodecFormat::Mpeg2Video
            | CodecFormat::H264
            | CodecFormat::Hevc
            | CodecFormat::Vc1 => StreamKind::Video,
            CodecFormat::Ac3
            | CodecFormat::Eac3
            | CodecFormat::TrueHd
            | CodecFormat::AacAdts
            | CodecFormat::AacLatm
            | CodecFormat::Dts
            | CodecFormat::DtsHd
            | CodecFormat::MpegAudio
            | CodecFormat::Lpcm => StreamKind::Audio,
            CodecFormat::Pgs
            | CodecFormat::TextSubtitle
            | CodecFormat::DvbSubtitle
            | CodecFormat::Teletext => StreamKind::Text,
            CodecFormat::Igs | CodecFormat::Unknown => StreamKind::Menu,
        }
    }

    /// Format label used until a frame parser reports a more precise one.
    pub fn name(self) -> &'static str {
        match self {
            CodecFormat::Mpeg1Video | CodecFormat::Mpeg2Video => "MPEG Video",
            CodecFormat::H264 => "AVC",
            CodecFormat::Hevc => "HEVC",
            CodecFormat::Vc1 => "VC-1",
            CodecFormat::Ac3 => "AC-3",
            CodecFormat::Eac3 => "E-AC-3",
            CodecFormat::TrueHd => "TrueHD",
            CodecFormat::AacAdts | CodecFormat::AacLatm => "AAC",
            CodecFormat::Dts | CodecFormat::DtsHd => "DTS",
            CodecFormat::MpegAudio => "MPEG Audio",
            CodecFormat::Lpcm => "PCM",
            CodecFormat::Pgs => "PGS",
            CodecFormat::Igs => "IGS",
            CodecFormat::TextSubtitle => "Text",
            CodecFormat::DvbSubtitle => "DVB Subtitle",
            CodecFormat::Teletext => "Teletext",
            CodecFormat::Unknown => "Unknown",
        }
    }

    /// The frame parser for this format, if one exists.
    pub fn parser(self) -> Option<FrameParser> {
        Some(match self {
            CodecFormat::Mpeg1Video | CodecFormat::Mpeg2Video => {
                FrameParser::Mpeg2(Mpeg2VideoParser::new())
            }
            CodecFormat::H264 => FrameParser::H264(H264Parser::new()),
            CodecFormat::Hevc => FrameParser::Hevc(HevcParser::new()),
            CodecFormat::Vc1 => FrameParser::Vc1(Vc1Parser::new()),
            CodecFormat::Ac3 | CodecFormat::Eac3 => FrameParser::Ac3(Ac3Parser::new()),
            CodecFormat::AacAdts => FrameParser::Aac(AacParser::new(AacMux::Adts)),
            CodecFormat::AacLatm => FrameParser::Aac(AacParser::new(AacMux::Latm)),
            CodecFormat::Dts | CodecFormat::DtsHd => FrameParser::Dts(DtsParser::new()),
            CodecFormat::Lpcm => FrameParser::Pcm(PcmParser::new()),
            _ => return None,
        })
    }
}
