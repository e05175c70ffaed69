//! Core types for media metadata representation
//!
//! Every container front-end produces the same shape: a [`Summary`] for the
//! file as a whole and an ordered list of [`StreamRecord`]s. A record keeps
//! two views of the same facts: an ordered, human readable field list and a
//! machine readable key/value map.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

/// Complete media file information
#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    /// Path to the probed file
    pub file_path: String,
    /// File size in bytes
    pub file_size: u64,
    /// Container format (e.g., "MPEG-TS", "BDAV", "Matroska", "MP4")
    pub container: String,
    /// File-level facts
    pub summary: Summary,
    /// Streams in output order
    pub streams: Vec<StreamRecord>,
}

impl MediaInfo {
    /// Iterate over the streams of one kind, in output order.
    pub fn streams_of(&self, kind: StreamKind) -> impl Iterator<Item = &StreamRecord> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }

    /// The first video stream, if any.
    pub fn primary_video(&self) -> Option<&StreamRecord> {
        self.streams_of(StreamKind::Video).next()
    }

    /// Build the general record (the summary rendered in the record model).
    pub fn general(&self) -> StreamRecord {
        let mut record = StreamRecord::new(StreamKind::General);
        record.set("Format", self.container.as_str());
        record.set("FileSize", self.file_size);
        if let Some(ms) = self.summary.duration_ms {
            record.set("Duration", ms);
        }
        if let Some(rate) = self.summary.overall_bitrate {
            record.set("OverallBitRate", rate);
        }
        if let Some(min) = self.summary.overall_bitrate_min {
            record.set("OverallBitRate_Minimum", min);
        }
        if let Some(max) = self.summary.overall_bitrate_max {
            record.set("OverallBitRate_Maximum", max);
        }
        record.set("StreamCount", self.streams.len() as u64);
        if self.summary.estimated {
            record.set("Estimated", true);
        }
        record
    }
}

/// File-level summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    /// Overall duration in milliseconds
    pub duration_ms: Option<u64>,
    /// Overall bitrate in bits/s
    pub overall_bitrate: Option<u64>,
    /// Lower bound of the overall bitrate given clock precision
    pub overall_bitrate_min: Option<u64>,
    /// Upper bound of the overall bitrate given clock precision
    pub overall_bitrate_max: Option<u64>,
    /// Counts were extrapolated from a bounded scan
    pub estimated: bool,
    /// Programs announced by the stream
    pub programs: Vec<ProgramInfo>,
}

/// Program information from the PAT/PMT and, when present, the SDT
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgramInfo {
    pub program_number: u16,
    pub pmt_pid: u16,
    pub pcr_pid: Option<u16>,
    pub service_name: Option<String>,
    pub service_provider: Option<String>,
    pub service_type: Option<u8>,
    /// Elementary PIDs in PMT order
    pub pids: Vec<u16>,
}

/// Kind of a stream record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum StreamKind {
    General,
    Video,
    Audio,
    Text,
    Menu,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::General => "General",
            StreamKind::Video => "Video",
            StreamKind::Audio => "Audio",
            StreamKind::Text => "Text",
            StreamKind::Menu => "Menu",
        };
        f.write_str(name)
    }
}

/// A machine readable field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    /// A decimal with a fixed number of reported places
    Decimal { value: f64, places: u8 },
    Text(String),
}

impl FieldValue {
    /// A decimal reported with `places` digits after the point.
    pub fn decimal(value: f64, places: u8) -> Self {
        FieldValue::Decimal { value, places }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::UInt(v) => Some(*v),
            FieldValue::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::UInt(v) => Some(*v as f64),
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Decimal { value, places } => Some(round_to(*value, *places)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: u8) -> f64 {
    let scale = 10f64.powi(places as i32);
    (value * scale).round() / scale
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(true) => f.write_str("Yes"),
            FieldValue::Bool(false) => f.write_str("No"),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::UInt(v) => write!(f, "{}", v),
            FieldValue::Decimal { value, places } => {
                write!(f, "{:.*}", *places as usize, round_to(*value, *places))
            }
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(v) => serializer.serialize_i64(*v),
            FieldValue::UInt(v) => serializer.serialize_u64(*v),
            FieldValue::Decimal { value, places } => {
                serializer.serialize_f64(round_to(*value, *places))
            }
            FieldValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

macro_rules! field_value_from {
    ($variant:ident, $target:ty: $($t:ty),*) => {
        $(impl From<$t> for FieldValue {
            fn from(v: $t) -> Self {
                FieldValue::$variant(v as $target)
            }
        })*
    };
}

field_value_from!(UInt, u64: u8, u16, u32, u64, usize);
field_value_from!(Int, i64: i8, i16, i32, i64);

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// One human readable `name: value` pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub value: String,
}

/// A stream (or general/menu) record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamRecord {
    pub kind: StreamKind,
    /// Fields in the order they were first set
    pub fields: Vec<Field>,
    /// Same facts keyed by name
    pub values: BTreeMap<String, FieldValue>,
}

impl StreamRecord {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            fields: Vec::new(),
            values: BTreeMap::new(),
        }
    }

    /// Set a field. Re-setting a name keeps its original position.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        let display = value.to_string();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => field.value = display,
            None => self.fields.push(Field {
                name: name.to_string(),
                value: display,
            }),
        }
        self.values.insert(name.to_string(), value);
    }

    /// Set a field only if it is not present yet.
    pub fn set_if_absent(&mut self, name: &str, value: impl Into<FieldValue>) {
        if !self.values.contains_key(name) {
            self.set(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Display form of a field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Copy every field of `other` this record lacks, in `other`'s order.
    pub fn merge_missing(&mut self, other: &StreamRecord) {
        for field in &other.fields {
            if let Some(value) = other.values.get(&field.name) {
                self.set_if_absent(&field.name, value.clone());
            }
        }
    }
}

/// HDR format variants
#[derive(Debug, Clone, PartialEq)]
pub enum HdrFormat {
    /// Standard Dynamic Range
    Sdr,
    /// SMPTE ST.2084 PQ with static metadata
    Hdr10 {
        mastering_display: Option<MasteringDisplay>,
        content_light_level: Option<ContentLightLevel>,
    },
    /// HDR10 with ST 2094-40 dynamic metadata
    Hdr10Plus {
        mastering_display: Option<MasteringDisplay>,
        content_light_level: Option<ContentLightLevel>,
    },
    /// Hybrid Log-Gamma
    Hlg,
    /// Dolby Vision
    DolbyVision {
        profile: u8,
        level: Option<u8>,
        bl_compatibility_id: Option<u8>,
        rpu_present: bool,
        el_present: bool,
    },
}

impl HdrFormat {
    /// Write the HDR facts of this format into a video record.
    pub fn apply_to(&self, record: &mut StreamRecord) {
        record.set("HDR_Format", self.to_string());
        match self {
            HdrFormat::Hdr10 {
                mastering_display,
                content_light_level,
            }
            | HdrFormat::Hdr10Plus {
                mastering_display,
                content_light_level,
            } => {
                if let Some(md) = mastering_display {
                    record.set(
                        "MasteringDisplay_Luminance",
                        format!(
                            "min: {:.4} cd/m2, max: {:.0} cd/m2",
                            md.min_luminance as f64 / 10000.0,
                            md.max_luminance as f64 / 10000.0
                        ),
                    );
                }
                if let Some(cll) = content_light_level {
                    record.set("MaxCLL", cll.max_cll);
                    record.set("MaxFALL", cll.max_fall);
                }
            }
            HdrFormat::DolbyVision {
                profile,
                level,
                bl_compatibility_id,
                rpu_present,
                el_present,
            } => {
                record.set("DolbyVision_Profile", *profile);
                if let Some(level) = level {
                    record.set("DolbyVision_Level", *level);
                }
                if let Some(id) = bl_compatibility_id {
                    record.set("DolbyVision_Compatibility", *id);
                }
                let layers = match (el_present, rpu_present) {
                    (true, true) => "BL+EL+RPU",
                    (true, false) => "BL+EL",
                    (false, true) => "BL+RPU",
                    (false, false) => "BL",
                };
                record.set("DolbyVision_Layers", layers);
            }
            HdrFormat::Sdr | HdrFormat::Hlg => {}
        }
    }
}

impl fmt::Display for HdrFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HdrFormat::Sdr => write!(f, "SDR"),
            HdrFormat::Hdr10 { .. } => write!(f, "HDR10"),
            HdrFormat::Hdr10Plus { .. } => write!(f, "HDR10+"),
            HdrFormat::Hlg => write!(f, "HLG"),
            HdrFormat::DolbyVision { profile, level, .. } => {
                write!(f, "Dolby Vision Profile {}", profile)?;
                if let Some(lvl) = level {
                    write!(f, " Level {}", lvl)?;
                }
                Ok(())
            }
        }
    }
}

/// SMPTE ST.2086 mastering display metadata
#[derive(Debug, Clone, PartialEq)]
pub struct MasteringDisplay {
    /// Display primaries [x, y] in units of 0.00002
    pub primaries: [[u16; 2]; 3],
    /// White point [x, y] in units of 0.00002
    pub white_point: [u16; 2],
    /// Maximum luminance in units of 0.0001 cd/m²
    pub max_luminance: u32,
    /// Minimum luminance in units of 0.0001 cd/m²
    pub min_luminance: u32,
}

/// Content light level information (CLL)
#[derive(Debug, Clone, PartialEq)]
pub struct ContentLightLevel {
    /// Maximum Content Light Level (cd/m²)
    pub max_cll: u16,
    /// Maximum Frame-Average Light Level (cd/m²)
    pub max_fall: u16,
}

/// ITU-T H.273 colour description as signalled in a VUI or sequence header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColourDescription {
    pub primaries: u8,
    pub transfer: u8,
    pub matrix: u8,
    pub full_range: bool,
}

impl ColourDescription {
    /// PQ or HLG transfer
    pub fn is_hdr_transfer(&self) -> bool {
        matches!(self.transfer, 16 | 18)
    }

    pub fn apply_to(&self, record: &mut StreamRecord) {
        if let Some(name) = colour_primaries_name(self.primaries) {
            record.set_if_absent("colour_primaries", name);
        }
        if let Some(name) = transfer_characteristics_name(self.transfer) {
            record.set_if_absent("transfer_characteristics", name);
        }
        if let Some(name) = matrix_coefficients_name(self.matrix) {
            record.set_if_absent("matrix_coefficients", name);
        }
        record.set_if_absent("colour_range", if self.full_range { "Full" } else { "Limited" });
    }
}

/// Display name for an H.273 colour primaries code; `None` for unspecified/reserved.
pub fn colour_primaries_name(code: u8) -> Option<&'static str> {
    Some(match code {
        1 => "BT.709",
        4 => "BT.470 System M",
        5 => "BT.601 PAL",
        6 => "BT.601 NTSC",
        7 => "SMPTE 240M",
        8 => "Generic film",
        9 => "BT.2020",
        10 => "XYZ",
        11 => "DCI P3",
        12 => "Display P3",
        22 => "EBU Tech 3213",
        _ => return None,
    })
}

/// Display name for an H.273 transfer characteristics code.
pub fn transfer_characteristics_name(code: u8) -> Option<&'static str> {
    Some(match code {
        1 => "BT.709",
        4 => "BT.470 System M",
        5 => "BT.470 System B/G",
        6 => "BT.601",
        7 => "SMPTE 240M",
        8 => "Linear",
        9 => "Logarithmic (100:1)",
        10 => "Logarithmic (316.22777:1)",
        11 => "xvYCC",
        12 => "BT.1361",
        13 => "sRGB/sYCC",
        14 | 15 => "BT.2020",
        16 => "PQ",
        17 => "SMPTE 428M",
        18 => "HLG",
        _ => return None,
    })
}

/// Display name for an H.273 matrix coefficients code.
pub fn matrix_coefficients_name(code: u8) -> Option<&'static str> {
    Some(match code {
        0 => "Identity",
        1 => "BT.709",
        4 => "FCC 73.682",
        5 => "BT.470 System B/G",
        6 => "BT.601",
        7 => "SMPTE 240M",
        8 => "YCgCo",
        9 => "BT.2020 non-constant",
        10 => "BT.2020 constant",
        11 => "Y'D'zD'x",
        12 => "Chromaticity-derived non-constant",
        13 => "Chromaticity-derived constant",
        14 => "ICtCp",
        _ => return None,
    })
}
