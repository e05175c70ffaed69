//! Shared helpers for CLI tests

#![allow(dead_code)]

#[path = "../../crates/mediascan-probe/tests/common/mod.rs"]
pub mod synth;

use std::io::Write;
use tempfile::NamedTempFile;

/// Write a two-second MPEG-TS program (MPEG-2 video and AC-3 audio) to a temp file.
pub fn transport_file() -> NamedTempFile {
    let data = synth::program_stream(&synth::Program {
        language: Some("eng"),
        ..Default::default()
    });
    write_temp(&data, ".ts")
}

pub fn write_temp(data: &[u8], suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}
