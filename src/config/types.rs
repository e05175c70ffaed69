use mediascan_probe::ProbeOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Parse thoroughness from 0.0 (bounded) to 1.0 (whole file)
    #[serde(default = "default_parse_speed")]
    pub parse_speed: f32,

    /// Nominal head window in MiB, scaled down at low parse speeds
    #[serde(default = "default_head_window_mib")]
    pub head_window_mib: u64,
}

fn default_parse_speed() -> f32 {
    0.5
}
fn default_head_window_mib() -> u64 {
    64
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            parse_speed: default_parse_speed(),
            head_window_mib: default_head_window_mib(),
        }
    }
}

impl ProbeConfig {
    /// Library options for this configuration, with an optional speed
    /// override from the command line.
    pub fn to_options(&self, speed_override: Option<f32>) -> ProbeOptions {
        ProbeOptions::default()
            .with_parse_speed(speed_override.unwrap_or(self.parse_speed))
            .with_head_window_cap(self.head_window_mib.saturating_mul(1024 * 1024))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reasons a configuration is rejected after parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("probe.parse_speed must be between 0.0 and 1.0, got {0}")]
    ParseSpeedOutOfRange(f32),

    #[error("probe.head_window_mib must be greater than 0")]
    EmptyHeadWindow,
}
