//! Turning final per-PID state into ordered stream records

use std::collections::BTreeMap;

use tracing::warn;

use super::clock::{PcrSpan, PTS_HZ};
use super::packet::PacketFormat;
use super::program_map::ProgramMap;
use super::stream::ElementaryStream;
use crate::types::{FieldValue, MediaInfo, StreamKind, StreamRecord, Summary};

/// Scan-wide facts the assembler needs besides the streams themselves
#[derive(Debug, Clone, Copy)]
pub struct ScanTotals {
    pub format: PacketFormat,
    pub file_size: u64,
    /// Packets the file holds in total
    pub total_packets: u64,
    /// Packets actually read in the scan windows
    pub scanned_packets: u64,
    /// The middle of the file was skipped
    pub windowed: bool,
}

impl ScanTotals {
    /// Factor applied to counts from a bounded scan.
    pub fn extrapolation(&self) -> f64 {
        if self.windowed && self.scanned_packets > 0 {
            (self.total_packets as f64 / self.scanned_packets as f64).max(1.0)
        } else {
            1.0
        }
    }
}

/// Output order: first seen, except on BDAV where the largest video
/// stream leads, followed by audio, text and everything else.
pub fn output_order<'a>(
    streams: &'a [ElementaryStream],
    format: PacketFormat,
) -> Vec<&'a ElementaryStream> {
    let mut ordered: Vec<&ElementaryStream> = streams.iter().collect();
    ordered.sort_by_key(|s| s.order);
    if format != PacketFormat::Bdav {
        return ordered;
    }

    let primary = ordered
        .iter()
        .filter(|s| s.binding.kind == StreamKind::Video)
        .max_by(|a, b| a.es_bytes.cmp(&b.es_bytes).then(b.order.cmp(&a.order)))
        .map(|s| s.pid);
    let rank = |s: &ElementaryStream| match s.binding.kind {
        _ if Some(s.pid) == primary => 0,
        StreamKind::Audio => 1,
        StreamKind::Text => 2,
        _ => 3,
    };
    ordered.sort_by_key(|s| (rank(s), s.order));
    ordered
}

/// Duration of one stream in seconds, from the richest source available:
/// the PTS span plus one frame, then frame count × frame duration, then
/// the PCR span of its program.
fn stream_duration(stream: &ElementaryStream, frame_count: f64, pcr: Option<&PcrSpan>) -> Option<f64> {
    let frame = stream.probe().and_then(|p| p.frame_duration());
    let ticks = stream.pts.duration_ticks();
    if ticks > 0 {
        return Some(ticks as f64 / PTS_HZ as f64 + frame.unwrap_or(0.0));
    }
    if let Some(frame) = frame {
        if frame_count > 0.0 {
            return Some(frame_count * frame);
        }
    }
    pcr.map(PcrSpan::elapsed_secs).filter(|secs| *secs > 0.0)
}

fn stream_record(
    stream: &ElementaryStream,
    totals: &ScanTotals,
    pcr: Option<&PcrSpan>,
) -> StreamRecord {
    let factor = totals.extrapolation();
    let mut record = StreamRecord::new(stream.binding.kind);
    record.set("ID", stream.pid);
    if let Some(program) = stream.binding.program_number {
        record.set("MenuID", program);
    }

    let probe = stream.probe();
    let facts = probe.and_then(|p| p.facts());
    match facts.and_then(|f| f.get("Format")) {
        Some(format) => record.set("Format", format.clone()),
        None => record.set("Format", stream.binding.format.name()),
    }
    if let Some(facts) = facts {
        record.merge_missing(facts);
    }
    if let Some(language) = &stream.binding.language {
        record.set("Language", language.as_str());
    }

    let frames = probe.map_or(0, |p| p.frames()) as f64 * factor;
    let duration = stream_duration(stream, frames, pcr);
    if let Some(secs) = duration {
        record.set("Duration", (secs * 1000.0).round() as u64);
    }

    let bytes = (stream.es_bytes as f64 * factor).round() as u64;
    if !record.contains("BitRate") {
        if let Some(secs) = duration.filter(|d| *d > 0.0) {
            if bytes > 0 {
                record.set("BitRate", (bytes as f64 * 8.0 / secs).round() as u64);
            }
        }
    }
    if bytes > 0 {
        record.set("StreamSize", bytes);
    }
    if frames > 0.0 {
        record.set("FrameCount", frames.round() as u64);
    }

    if let Some(probe) = probe {
        probe.write_statistics(&mut record, totals.windowed);
        if probe.frames() == 0 && stream.packets > 0 {
            warn!(
                pid = stream.pid,
                format = stream.binding.format.name(),
                rejected = probe.rejected(),
                "no valid frames decoded for stream"
            );
        }
    }
    if totals.windowed {
        record.set("Estimated", true);
    }
    record
}

fn menu_record(programs: &ProgramMap) -> Option<StreamRecord> {
    let program = programs.primary_service()?;
    let mut record = StreamRecord::new(StreamKind::Menu);
    record.set("ID", program.pmt_pid);
    record.set("MenuID", program.program_number);
    if let Some(name) = &program.service_name {
        record.set("ServiceName", name.as_str());
    }
    if let Some(provider) = &program.service_provider {
        record.set("ServiceProvider", provider.as_str());
    }
    if let Some(service_type) = program.service_type {
        record.set("ServiceType", service_type_name(service_type));
    }
    let list: Vec<String> = program.pids.iter().map(|pid| pid.to_string()).collect();
    record.set("List", list.join(" / "));
    Some(record)
}

fn service_type_name(service_type: u8) -> FieldValue {
    match service_type {
        0x01 => "digital television".into(),
        0x02 => "digital radio sound".into(),
        0x0C => "data broadcast".into(),
        0x11 => "MPEG-2 HD digital television".into(),
        0x16 => "H.264/AVC SD digital television".into(),
        0x19 => "H.264/AVC HD digital television".into(),
        0x1F => "HEVC digital television".into(),
        other => u64::from(other).into(),
    }
}

/// Build the final report.
pub fn assemble(
    path: &str,
    streams: &[ElementaryStream],
    pcr: &BTreeMap<u16, PcrSpan>,
    programs: &ProgramMap,
    totals: ScanTotals,
) -> MediaInfo {
    let pcr_pid_of = |program: Option<u16>| {
        let info = programs.programs();
        program
            .and_then(|n| info.into_iter().find(|p| p.program_number == n))
            .and_then(|p| p.pcr_pid)
    };

    let mut records: Vec<StreamRecord> = output_order(streams, totals.format)
        .into_iter()
        .map(|stream| {
            let span = pcr_pid_of(stream.binding.program_number)
                .and_then(|pid| pcr.get(&pid))
                .or_else(|| pcr.get(&stream.pid));
            stream_record(stream, &totals, span)
        })
        .collect();
    if let Some(menu) = menu_record(programs) {
        records.push(menu);
    }

    let longest = pcr
        .values()
        .filter(|span| span.elapsed_ticks() > 0)
        .max_by_key(|span| span.elapsed_ticks());
    let mut summary = Summary {
        estimated: totals.windowed,
        programs: programs.programs(),
        ..Default::default()
    };
    match longest {
        Some(span) => {
            summary.duration_ms = Some((span.elapsed_secs() * 1000.0).round() as u64);
            summary.overall_bitrate = span.bitrate().map(|b| b.round() as u64);
            if let Some((min, max)) = span.bitrate_bounds() {
                summary.overall_bitrate_min = Some(min.round() as u64);
                summary.overall_bitrate_max = Some(max.round() as u64);
            }
        }
        None => {
            let ms = records
                .iter()
                .filter_map(|r| r.get("Duration").and_then(FieldValue::as_u64))
                .max()
                .filter(|ms| *ms > 0);
            summary.duration_ms = ms;
            summary.overall_bitrate = ms.map(|ms| (totals.file_size as f64 * 8000.0 / ms as f64).round() as u64);
        }
    }

    MediaInfo {
        file_path: path.to_string(),
        file_size: totals.file_size,
        container: totals.format.name().to_string(),
        summary,
        streams: records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecFormat;
    use crate::ts::program_map::StreamBinding;

    fn stream(pid: u16, format: CodecFormat, order: usize, bytes: u64) -> ElementaryStream {
        let mut s = ElementaryStream::new(pid, StreamBinding::sniffed(format), order);
        s.es_bytes = bytes;
        s
    }

    fn streams() -> Vec<ElementaryStream> {
        vec![
            stream(0x1100, CodecFormat::Ac3, 0, 1_000),
            stream(0x1200, CodecFormat::Pgs, 1, 10),
            stream(0x1012, CodecFormat::H264, 2, 5_000),
            stream(0x1011, CodecFormat::Hevc, 3, 90_000),
            stream(0x1101, CodecFormat::Dts, 4, 2_000),
        ]
    }

    #[test]
    fn test_first_seen_order() {
        let streams = streams();
        let pids: Vec<u16> = output_order(&streams, PacketFormat::Ts)
            .iter()
            .map(|s| s.pid)
            .collect();
        assert_eq!(pids, vec![0x1100, 0x1200, 0x1012, 0x1011, 0x1101]);
    }

    #[test]
    fn test_bdav_promotes_primary_video() {
        let streams = streams();
        let pids: Vec<u16> = output_order(&streams, PacketFormat::Bdav)
            .iter()
            .map(|s| s.pid)
            .collect();
        assert_eq!(pids, vec![0x1011, 0x1100, 0x1101, 0x1200, 0x1012]);
    }

    #[test]
    fn test_extrapolation_only_when_windowed() {
        let mut totals = ScanTotals {
            format: PacketFormat::Ts,
            file_size: 0,
            total_packets: 1000,
            scanned_packets: 250,
            windowed: false,
        };
        assert_eq!(totals.extrapolation(), 1.0);
        totals.windowed = true;
        assert_eq!(totals.extrapolation(), 4.0);
    }

    #[test]
    fn test_degenerate_duration_suppresses_bitrate() {
        let s = stream(0x100, CodecFormat::Pgs, 0, 500);
        let totals = ScanTotals {
            format: PacketFormat::Ts,
            file_size: 0,
            total_packets: 0,
            scanned_packets: 0,
            windowed: false,
        };
        let record = stream_record(&s, &totals, None);
        assert_eq!(record.field("Format"), Some("PGS"));
        assert!(!record.contains("Duration"));
        assert!(!record.contains("BitRate"));
        assert_eq!(record.get("StreamSize").and_then(FieldValue::as_u64), Some(500));
    }
}
