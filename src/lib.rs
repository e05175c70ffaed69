//! mediascan - Transport stream analysis tool
//!
//! This library crate exposes the CLI's configuration and rendering for
//! integration testing. Probing itself lives in `mediascan-probe`.

pub mod config;
pub mod render;
