//! # mediascan-probe
//!
//! Pure Rust media analysis with a bounded MPEG transport stream engine.
//!
//! Transport streams (188-byte MPEG-TS and 192-byte BDAV/M2TS) are
//! demultiplexed packet by packet: program tables are reassembled and
//! bound to elementary PIDs, PES units are routed to codec frame parsers,
//! and clock references yield duration and bitrate. Large files are read
//! through a head and a tail window sized by [`ProbeOptions`]; counts are
//! then extrapolated and flagged as estimated.
//!
//! Matroska and MP4 files are read through the `matroska` and `mp4parse`
//! crates into the same record model.
//!
//! ## Example
//!
//! ```no_run
//! use mediascan_probe::{probe_file_with, ProbeOptions, StreamKind};
//!
//! let options = ProbeOptions::default().with_parse_speed(0.25);
//! let info = probe_file_with("movie.m2ts", &options).unwrap();
//!
//! println!("Container: {}", info.container);
//! println!("Duration: {:?}ms", info.summary.duration_ms);
//!
//! for stream in info.streams_of(StreamKind::Audio) {
//!     println!(
//!         "Audio: {} {:?}",
//!         stream.field("Format").unwrap_or("?"),
//!         stream.field("dialnorm_Average"),
//!     );
//! }
//! ```

pub mod codec;
pub mod container;
pub mod error;
pub mod hdr;
pub mod options;
pub mod stats;
pub mod ts;
pub mod types;

pub use container::Container;
pub use error::{ProbeError, Result};
pub use options::ProbeOptions;
pub use types::*;

use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

/// Probe a media file with default options.
pub fn probe_file<P: AsRef<Path>>(path: P) -> Result<MediaInfo> {
    probe_file_with(path, &ProbeOptions::default())
}

/// Probe a media file.
///
/// The container is detected from magic bytes, falling back to the file
/// extension when the leading bytes are inconclusive.
pub fn probe_file_with<P: AsRef<Path>>(path: P, options: &ProbeOptions) -> Result<MediaInfo> {
    let path = path.as_ref();
    let file = container::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let container = match container::detect_container_from_reader(&mut reader) {
        Ok(container) => container,
        Err(err) => container::container_from_extension(path).ok_or(err)?,
    };
    debug!(path = %path.display(), %container, file_size, "probing");

    probe_container(reader, container, file_size, &path.to_string_lossy(), options)
}

/// Probe any seekable source, such as an in-memory buffer.
pub fn probe_reader<R: Read + Seek>(mut reader: R, options: &ProbeOptions) -> Result<MediaInfo> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    let container = container::detect_container_from_reader(&mut reader)?;
    probe_container(reader, container, file_size, "<memory>", options)
}

fn probe_container<R: Read + Seek>(
    reader: R,
    container: Container,
    file_size: u64,
    label: &str,
    options: &ProbeOptions,
) -> Result<MediaInfo> {
    match container {
        Container::MpegTs | Container::Bdav => {
            ts::probe_transport(reader, file_size, label, options)
        }
        Container::Matroska => container::mkv::probe_reader(reader, file_size, label),
        Container::Mp4 => container::mp4::probe_reader(reader, file_size, label),
    }
}

/// Check if a file appears to be a supported format
///
/// This performs a quick check of the file's leading bytes without
/// parsing the container.
pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
    container::detect_container(path.as_ref()).is_ok()
}

/// Get the detected container format for a file
pub fn detect_container<P: AsRef<Path>>(path: P) -> Result<Container> {
    container::detect_container(path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let result = probe_file("/nonexistent/file.ts");
        assert!(matches!(result, Err(ProbeError::FileNotFound(_))));
    }

    #[test]
    fn test_unknown_reader() {
        let data = std::io::Cursor::new(vec![0x33u8; 2048]);
        assert!(matches!(
            probe_reader(data, &ProbeOptions::default()),
            Err(ProbeError::UnsupportedContainer(_))
        ));
    }
}
