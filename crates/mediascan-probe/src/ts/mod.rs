//! MPEG transport stream demultiplexing
//!
//! Handles plain 188-byte MPEG-TS and 192-byte BDAV (`.m2ts`) framing.
//! Packets flow through the [`packet`] scanner into section reassembly
//! ([`section`], [`psi`]) or PES reassembly ([`pes`]) depending on what the
//! [`program_map`] knows about their PID. Reassembled payloads are handed to
//! per-stream frame parsers ([`dispatch`]), and [`output`] turns the
//! accumulated state into a [`MediaInfo`](crate::MediaInfo).
//!
//! Large files are scanned through a head window and a tail window chosen
//! by the [`planner`]; counts are then extrapolated and marked as estimated.

pub mod clock;
pub mod demux;
pub mod dispatch;
pub mod output;
pub mod packet;
pub mod pes;
pub mod planner;
pub mod program_map;
pub mod psi;
pub mod section;
pub mod stream;

pub use demux::{detect_format, probe_transport};
pub use packet::{find_alignment, PacketFormat};
