//! Container format detection and the non-transport front-ends

pub mod mkv;
pub mod mp4;

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{ProbeError, Result};
use crate::ts::{detect_format, PacketFormat};

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// MPEG transport stream, 188-byte packets (.ts, .trp)
    MpegTs,
    /// Blu-ray transport stream, 192-byte packets (.m2ts, .mts)
    Bdav,
    /// Matroska (.mkv, .webm)
    Matroska,
    /// MPEG-4 Part 14 (.mp4, .m4v, .mov)
    Mp4,
}

impl Container {
    /// Whether the transport stream demultiplexer handles this container.
    pub fn is_transport(self) -> bool {
        matches!(self, Container::MpegTs | Container::Bdav)
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Container::MpegTs => write!(f, "MPEG-TS"),
            Container::Bdav => write!(f, "BDAV"),
            Container::Matroska => write!(f, "Matroska"),
            Container::Mp4 => write!(f, "MP4"),
        }
    }
}

impl From<PacketFormat> for Container {
    fn from(format: PacketFormat) -> Self {
        match format {
            PacketFormat::Ts => Container::MpegTs,
            PacketFormat::Bdav => Container::Bdav,
        }
    }
}

/// Open a file, mapping a missing file to [`ProbeError::FileNotFound`].
pub(crate) fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProbeError::FileNotFound(path.to_path_buf())
        } else {
            ProbeError::Io(e)
        }
    })
}

/// Detect container format from file magic bytes
pub fn detect_container(path: &Path) -> Result<Container> {
    let mut reader = BufReader::new(open(path)?);
    detect_container_from_reader(&mut reader)
}

/// Detect container format from a reader. The reader is rewound afterwards.
pub fn detect_container_from_reader<R: Read + Seek>(reader: &mut R) -> Result<Container> {
    reader.seek(SeekFrom::Start(0))?;
    let mut magic = Vec::with_capacity(12);
    reader.by_ref().take(12).read_to_end(&mut magic)?;

    let detected = if magic.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        // EBML header
        Some(Container::Matroska)
    } else if magic.len() >= 8 && matches!(&magic[4..8], b"ftyp" | b"moov" | b"mdat" | b"free") {
        Some(Container::Mp4)
    } else {
        detect_format(reader)?.map(|(format, _)| Container::from(format))
    };

    reader.seek(SeekFrom::Start(0))?;
    detected.ok_or_else(|| {
        ProbeError::UnsupportedContainer(
            "Unable to detect container format from magic bytes".to_string(),
        )
    })
}

/// Get container type from file extension (fallback)
pub fn container_from_extension(path: &Path) -> Option<Container> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "ts" | "trp" | "tp" | "mpegts" => Some(Container::MpegTs),
        "m2ts" | "mts" | "m2t" => Some(Container::Bdav),
        "mkv" | "webm" | "mka" | "mk3d" => Some(Container::Matroska),
        "mp4" | "m4v" | "m4a" | "mov" | "3gp" | "3g2" => Some(Container::Mp4),
        _ => None,
    }
}
