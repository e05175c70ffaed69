//! MP4/MOV front-end

use std::io::Read;

use mp4parse::{read_mp4, SampleEntry, TrackType};

use crate::error::{ProbeError, Result};
use crate::types::{MediaInfo, StreamKind, StreamRecord, Summary};

/// Probe an MP4 source.
pub fn probe_reader<R: Read>(mut reader: R, file_size: u64, label: &str) -> Result<MediaInfo> {
    let context = read_mp4(&mut reader)
        .map_err(|e| ProbeError::ContainerParse(format!("MP4 parse error: {:?}", e)))?;

    let mut streams = Vec::new();
    let mut duration_ms = None;

    for track in context.tracks.iter() {
        let track_ms = track.duration.and_then(|d| {
            let scale = track
                .timescale
                .map(|s| s.0)
                .or(context.timescale.map(|s| s.0))?;
            (scale > 0).then(|| d.0 * 1000 / scale)
        });

        let record = match track.track_type {
            TrackType::Video => video_record(track),
            TrackType::Audio => audio_record(track),
            TrackType::Metadata => text_record(track),
            _ => None,
        };
        let Some(mut record) = record else {
            continue;
        };
        if let Some(ms) = track_ms {
            record.set("Duration", ms);
            duration_ms = duration_ms.max(Some(ms));
        }
        streams.push(record);
    }

    Ok(MediaInfo {
        file_path: label.to_string(),
        file_size,
        container: "MP4".to_string(),
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

fn new_record(kind: StreamKind, track: &mp4parse::Track) -> StreamRecord {
    let mut record = StreamRecord::new(kind);
    if let Some(id) = track.track_id {
        record.set("ID", id);
    }
    record
}

fn video_record(track: &mp4parse::Track) -> Option<StreamRecord> {
    let stsd = track.stsd.as_ref()?;
    let SampleEntry::Video(ve) = stsd.descriptions.first()? else {
        return None;
    };
    let format = match &ve.codec_specific {
        mp4parse::VideoCodecSpecific::AVCConfig(_) => "AVC",
        mp4parse::VideoCodecSpecific::AV1Config(_) => "AV1",
        mp4parse::VideoCodecSpecific::VPxConfig(_) => "VP9",
        mp4parse::VideoCodecSpecific::ESDSConfig(_) => "MPEG-4 Visual",
        mp4parse::VideoCodecSpecific::H263Config(_) => "H.263",
        #[allow(unreachable_patterns)]
        _ => "Unknown",
    };

    let mut record = new_record(StreamKind::Video, track);
    record.set("Format", format);
    record.set("Width", ve.width);
    record.set("Height", ve.height);
    Some(record)
}

fn audio_record(track: &mp4parse::Track) -> Option<StreamRecord> {
    let stsd = track.stsd.as_ref()?;
    let SampleEntry::Audio(ae) = stsd.descriptions.first()? else {
        return None;
    };
    let (format, profile) = match &ae.codec_specific {
        mp4parse::AudioCodecSpecific::ES_Descriptor(esds) => match esds.audio_object_type {
            Some(5) => ("AAC", Some("HE-AAC")),
            Some(29) => ("AAC", Some("HE-AACv2")),
            Some(2) => ("AAC", Some("LC")),
            _ => ("AAC", None),
        },
        mp4parse::AudioCodecSpecific::FLACSpecificBox(_) => ("FLAC", None),
        mp4parse::AudioCodecSpecific::OpusSpecificBox(_) => ("Opus", None),
        mp4parse::AudioCodecSpecific::ALACSpecificBox(_) => ("ALAC", None),
        mp4parse::AudioCodecSpecific::MP3 => ("MPEG Audio", None),
        mp4parse::AudioCodecSpecific::LPCM => ("PCM", None),
        #[allow(unreachable_patterns)]
        _ => ("Unknown", None),
    };

    let mut record = new_record(StreamKind::Audio, track);
    record.set("Format", format);
    if let Some(profile) = profile {
        record.set("Format_Profile", profile);
    }
    record.set("Channels", ae.channelcount);
    record.set("SamplingRate", ae.samplerate.round() as u64);
    if ae.samplesize > 0 {
        record.set("BitDepth", ae.samplesize);
    }
    Some(record)
}

fn text_record(track: &mp4parse::Track) -> Option<StreamRecord> {
    let stsd = track.stsd.as_ref()?;
    stsd.descriptions.first()?;
    let mut record = new_record(StreamKind::Text, track);
    record.set("Format", "Timed Text");
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_truncated_box_is_a_parse_error() {
        let data = b"\x00\x00\x00\x18ftypisom".to_vec();
        let err = probe_reader(Cursor::new(data), 12, "cut.mp4").unwrap_err();
        assert!(matches!(err, ProbeError::ContainerParse(_)));
    }
}
