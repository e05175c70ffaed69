//! Report rendering for the `probe` command.

use std::fmt::Write;

use mediascan_probe::{MediaInfo, StreamKind, StreamRecord};

use crate::config::OutputFormat;

/// Column at which values start in text output
const LABEL_WIDTH: usize = 41;

/// Render a report in the requested format.
pub fn render(info: &MediaInfo, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(info)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(info)?),
    }
}

/// One section per record, general first, numbered when a kind repeats.
pub fn render_text(info: &MediaInfo) -> String {
    let mut out = String::new();
    write_record(&mut out, "General", &info.general());

    for record in &info.streams {
        let total = info.streams_of(record.kind).count();
        let title = if total > 1 {
            let index = info
                .streams_of(record.kind)
                .position(|r| std::ptr::eq(r, record))
                .unwrap_or(0);
            format!("{} #{}", record.kind, index + 1)
        } else {
            record.kind.to_string()
        };
        out.push('\n');
        write_record(&mut out, &title, record);
    }
    out
}

fn write_record(out: &mut String, title: &str, record: &StreamRecord) {
    let _ = writeln!(out, "{}", title);
    for field in &record.fields {
        let _ = writeln!(out, "{:<width$}: {}", field.name, field.value, width = LABEL_WIDTH);
    }
}

/// Short one-line description, used in verbose logs.
pub fn headline(info: &MediaInfo) -> String {
    let streams = [StreamKind::Video, StreamKind::Audio, StreamKind::Text]
        .iter()
        .map(|kind| format!("{} {}", info.streams_of(*kind).count(), kind))
        .collect::<Vec<_>>()
        .join(", ");
    match info.summary.duration_ms {
        Some(ms) => format!("{} ({} ms): {}", info.container, ms, streams),
        None => format!("{}: {}", info.container, streams),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediascan_probe::Summary;

    fn sample() -> MediaInfo {
        let mut audio_a = StreamRecord::new(StreamKind::Audio);
        audio_a.set("ID", 257u16);
        audio_a.set("Format", "AC-3");
        let mut audio_b = StreamRecord::new(StreamKind::Audio);
        audio_b.set("ID", 258u16);
        audio_b.set("Format", "AAC");
        let mut video = StreamRecord::new(StreamKind::Video);
        video.set("ID", 256u16);

        MediaInfo {
            file_path: "sample.ts".to_string(),
            file_size: 1000,
            container: "MPEG-TS".to_string(),
            summary: Summary {
                duration_ms: Some(2000),
                ..Default::default()
            },
            streams: vec![video, audio_a, audio_b],
        }
    }

    #[test]
    fn test_text_sections() {
        let text = render_text(&sample());
        assert!(text.starts_with("General\n"));
        assert!(text.contains("\nVideo\n"));
        assert!(text.contains("\nAudio #1\n"));
        assert!(text.contains("\nAudio #2\n"));
        assert!(text.contains(&format!("{:<41}: AAC", "Format")));
        assert!(text.contains(&format!("{:<41}: 2000", "Duration")));
    }

    #[test]
    fn test_headline() {
        assert_eq!(headline(&sample()), "MPEG-TS (2000 ms): 1 Video, 2 Audio, 0 Text");
    }

    #[test]
    fn test_json() {
        let json = render(&sample(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["container"], "MPEG-TS");
    }
}
