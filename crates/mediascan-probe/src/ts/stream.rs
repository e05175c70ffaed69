//! Per-PID elementary stream state

use tracing::{debug, trace};

use super::clock::PtsTracker;
use super::dispatch::StreamProbe;
use super::pes::{parse_pes_header, PesAccumulator, AUDIO_UNIT_CAP, VIDEO_UNIT_CAP};
use super::program_map::{BindingSource, StreamBinding};
use crate::stats::ScanWindow;
use crate::types::StreamKind;

/// Everything accumulated for one elementary PID.
///
/// Created on the first PMT entry or successful sniff for the PID and
/// only ever enriched afterwards; counters never decrease.
#[derive(Debug)]
pub struct ElementaryStream {
    pub pid: u16,
    pub binding: StreamBinding,
    /// Position in first-seen order
    pub order: usize,
    /// Elementary stream bytes (PES payload, headers excluded)
    pub es_bytes: u64,
    pub packets: u64,
    /// PES units started
    pub units: u64,
    pub pts: PtsTracker,
    pes: PesAccumulator,
    probe: Option<StreamProbe>,
    /// Separate reassembly for the parameter recovery pass
    recovery: Option<PesAccumulator>,
}

fn unit_cap(kind: StreamKind) -> usize {
    match kind {
        StreamKind::Video => VIDEO_UNIT_CAP,
        _ => AUDIO_UNIT_CAP,
    }
}

fn probe_for(binding: &StreamBinding) -> Option<StreamProbe> {
    match binding.kind {
        StreamKind::Video | StreamKind::Audio => StreamProbe::for_binding(binding),
        _ => None,
    }
}

impl ElementaryStream {
    pub fn new(pid: u16, binding: StreamBinding, order: usize) -> Self {
        Self {
            pid,
            pes: PesAccumulator::new(unit_cap(binding.kind)),
            probe: probe_for(&binding),
            binding,
            order,
            es_bytes: 0,
            packets: 0,
            units: 0,
            pts: PtsTracker::new(),
            recovery: None,
        }
    }

    pub fn probe(&self) -> Option<&StreamProbe> {
        self.probe.as_ref()
    }

    /// Apply a PMT binding. Kind, format and language are overwritten;
    /// counters and timestamps are kept. The frame parser is replaced only
    /// when the format changes.
    pub fn rebind(&mut self, binding: StreamBinding) {
        if self.binding == binding {
            return;
        }
        if self.binding.format != binding.format {
            debug!(
                pid = self.pid,
                from = ?self.binding.format,
                to = ?binding.format,
                "stream format rebound"
            );
            self.probe = probe_for(&binding);
            self.pes = PesAccumulator::new(unit_cap(binding.kind));
        } else if self.binding.source == BindingSource::Sniffed && binding.dovi.is_some() {
            self.probe = probe_for(&binding);
        }
        self.binding = binding;
    }

    /// Feed one transport packet payload.
    pub fn on_packet(&mut self, payload: &[u8], payload_start: bool, window: ScanWindow) {
        self.packets += 1;
        let mut header_len = 0;
        if payload_start {
            if let Some(header) = parse_pes_header(payload) {
                self.units += 1;
                header_len = header.header_len.min(payload.len());
                if let Some(pts) = header.pts {
                    self.pts.observe(pts);
                }
            }
        }
        self.es_bytes += (payload.len() - header_len) as u64;

        for unit in self.pes.push(payload, payload_start) {
            if unit.truncated {
                trace!(pid = self.pid, len = unit.data.len(), "truncated PES unit");
            }
            if let Some(probe) = self.probe.as_mut() {
                probe.feed(&unit.data, window);
            }
        }
    }

    /// Flush the unit in progress at the end of a scan window.
    pub fn close_window(&mut self, window: ScanWindow) {
        if let Some(unit) = self.pes.flush() {
            if let Some(probe) = self.probe.as_mut() {
                probe.feed(&unit.data, window);
            }
        }
        if let Some(probe) = self.probe.as_mut() {
            probe.finish_window();
        }
    }

    /// A video stream whose sequence parameters were never decoded.
    pub fn needs_recovery(&self) -> bool {
        self.binding.kind == StreamKind::Video
            && self.packets > 0
            && self.probe.as_ref().is_some_and(|p| !p.key_params())
    }

    /// Feed a packet from the recovery pass. Returns true once parameters
    /// are known.
    pub fn recover_packet(&mut self, payload: &[u8], payload_start: bool) -> bool {
        let Some(probe) = self.probe.as_mut() else {
            return true;
        };
        let pes = self
            .recovery
            .get_or_insert_with(|| PesAccumulator::new(VIDEO_UNIT_CAP));
        for unit in pes.push(payload, payload_start) {
            if probe.feed_recovery(&unit.data) {
                self.recovery = None;
                return true;
            }
        }
        false
    }
}
