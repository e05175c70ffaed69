//! Matroska (MKV/WebM) front-end

use std::io::{Read, Seek};

use matroska::Matroska;
use tracing::debug;

use crate::codec::hevc::parse_hevc_config;
use crate::error::{ProbeError, Result};
use crate::types::{FieldValue, MediaInfo, StreamKind, StreamRecord, Summary};

/// Probe a Matroska source.
pub fn probe_reader<R: Read + Seek>(reader: R, file_size: u64, label: &str) -> Result<MediaInfo> {
    let mkv = Matroska::open(reader)
        .map_err(|e| ProbeError::ContainerParse(format!("MKV parse error: {}", e)))?;

    let duration_ms = mkv.info.duration.map(|d| d.as_millis() as u64);
    let mut streams = Vec::new();

    for track in &mkv.tracks {
        let kind = match &track.settings {
            matroska::Settings::Video(_) => StreamKind::Video,
            matroska::Settings::Audio(_) => StreamKind::Audio,
            matroska::Settings::None if track.tracktype == matroska::Tracktype::Subtitle => {
                StreamKind::Text
            }
            matroska::Settings::None => {
                debug!(track = track.number, codec = %track.codec_id, "skipping track");
                continue;
            }
        };

        let mut record = StreamRecord::new(kind);
        record.set("ID", track.number);
        record.set("Format", codec_id_to_name(&track.codec_id));
        record.set("CodecID", track.codec_id.as_str());

        match &track.settings {
            matroska::Settings::Video(video) => {
                if is_hevc_codec(&track.codec_id) {
                    if let Some(info) = track.codec_private.as_deref().and_then(parse_hevc_config) {
                        info.apply_to(&mut record);
                    }
                }
                record.set_if_absent("Width", video.pixel_width);
                record.set_if_absent("Height", video.pixel_height);
                if let Some(d) = track.default_duration.filter(|d| d.as_secs_f64() > 0.0) {
                    record.set_if_absent("FrameRate", FieldValue::decimal(1.0 / d.as_secs_f64(), 3));
                }
            }
            matroska::Settings::Audio(audio) => {
                record.set("Channels", audio.channels);
                record.set("SamplingRate", audio.sample_rate.round() as u64);
                if let Some(depth) = audio.bit_depth {
                    record.set("BitDepth", depth);
                }
            }
            matroska::Settings::None => {}
        }

        if let Some(language) = &track.language {
            record.set("Language", language.to_string());
        }
        if let Some(title) = &track.name {
            record.set("Title", title.as_str());
        }
        if let Some(ms) = duration_ms {
            record.set("Duration", ms);
        }
        record.set("Default", track.default);
        if kind == StreamKind::Text {
            record.set("Forced", track.forced);
        }
        streams.push(record);
    }

    Ok(MediaInfo {
        file_path: label.to_string(),
        file_size,
        container: "Matroska".to_string(),
        summary: Summary {
            duration_ms,
            overall_bitrate: duration_ms
                .filter(|ms| *ms > 0)
                .map(|ms| (file_size as f64 * 8000.0 / ms as f64).round() as u64),
            ..Default::default()
        },
        streams,
    })
}

fn is_hevc_codec(codec_id: &str) -> bool {
    codec_id == "V_MPEGH/ISO/HEVC" || codec_id.contains("HEVC") || codec_id.contains("H265")
}

/// Convert a Matroska codec ID to the format names the transport path uses.
fn codec_id_to_name(codec_id: &str) -> String {
    let name = match codec_id {
        "V_MPEG4/ISO/AVC" => "AVC",
        "V_MPEGH/ISO/HEVC" => "HEVC",
        "V_AV1" => "AV1",
        "V_VP8" => "VP8",
        "V_VP9" => "VP9",
        "V_MPEG1" | "V_MPEG2" => "MPEG Video",
        "V_MS/VFW/FOURCC" => "VfW",
        "V_MPEG4/ISO/SP" | "V_MPEG4/ISO/ASP" | "V_MPEG4/ISO/AP" => "MPEG-4 Visual",

        "A_AAC" | "A_AAC/MPEG2/LC" | "A_AAC/MPEG4/LC" | "A_AAC/MPEG4/LC/SBR" => "AAC",
        "A_AC3" => "AC-3",
        "A_EAC3" => "E-AC-3",
        "A_DTS" | "A_DTS/EXPRESS" | "A_DTS/LOSSLESS" => "DTS",
        "A_TRUEHD" => "MLP FBA",
        "A_FLAC" => "FLAC",
        "A_VORBIS" => "Vorbis",
        "A_OPUS" => "Opus",
        "A_PCM/INT/LIT" | "A_PCM/INT/BIG" | "A_PCM/FLOAT/IEEE" => "PCM",
        "A_MPEG/L3" | "A_MPEG/L2" => "MPEG Audio",

        "S_TEXT/UTF8" => "UTF-8",
        "S_TEXT/SSA" | "S_TEXT/ASS" => "ASS",
        "S_HDMV/PGS" => "PGS",
        "S_VOBSUB" => "VobSub",
        "S_DVBSUB" => "DVB Subtitle",
        "S_TEXT/WEBVTT" => "WebVTT",

        other => other
            .strip_prefix("V_")
            .or_else(|| other.strip_prefix("A_"))
            .or_else(|| other.strip_prefix("S_"))
            .unwrap_or(other),
    };
    name.to_string()
}
