use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{MicVizError, Result};

/// Frame sizes accepted by the frame sink, in sample-frames.
pub const FRAME_SIZES: [u32; 7] = [256, 512, 1024, 2048, 4096, 8192, 16384];
pub const DEFAULT_FRAME_SIZE: u32 = 4096;
pub const DEFAULT_CHANNELS: u8 = 1;
pub const MAX_CHANNELS: u8 = 32;

/// Optional tuning passed when the visualizer is created. Missing values fall
/// back to the defaults when resolved into a [`VisualizerConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_input_channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_output_channels: Option<u8>,
}

/// Validated, immutable frame delivery settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualizerConfig {
    frame_size: u32,
    input_channels: u8,
    output_channels: u8,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            input_channels: DEFAULT_CHANNELS,
            output_channels: DEFAULT_CHANNELS,
        }
    }
}

impl VisualizerConfig {
    /// Applies defaults to `options` and checks every value is supported.
    pub fn resolve(options: &VisualizerOptions) -> Result<Self> {
        let frame_size = options.buffer_size.unwrap_or(DEFAULT_FRAME_SIZE);
        if !FRAME_SIZES.contains(&frame_size) {
            return Err(MicVizError::config(format!(
                "buffer size {frame_size} is not one of {FRAME_SIZES:?}"
            )));
        }

        let input_channels = validate_channels(
            "input",
            options.number_of_input_channels.unwrap_or(DEFAULT_CHANNELS),
        )?;
        let output_channels = validate_channels(
            "output",
            options.number_of_output_channels.unwrap_or(DEFAULT_CHANNELS),
        )?;

        Ok(Self {
            frame_size,
            input_channels,
            output_channels,
        })
    }

    /// Number of sample-frames delivered per frame event.
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn input_channels(&self) -> u8 {
        self.input_channels
    }

    pub fn output_channels(&self) -> u8 {
        self.output_channels
    }
}

fn validate_channels(direction: &str, channels: u8) -> Result<u8> {
    if (1..=MAX_CHANNELS).contains(&channels) {
        Ok(channels)
    } else {
        Err(MicVizError::config(format!(
            "number of {direction} channels must be between 1 and {MAX_CHANNELS}, got {channels}"
        )))
    }
}

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub visualizer: VisualizerOptions,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub display: DisplaySettings,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Which capture device feeds the visualizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Input device name. `None` picks the host default.
    pub device: Option<String>,
    /// Use a generated tone instead of a hardware device.
    pub synthetic: bool,
    pub synthetic_frequency_hz: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: None,
            synthetic: false,
            synthetic_frequency_hz: 440.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Number of peak columns drawn per frame.
    pub width: usize,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self { width: 64 }
    }
}
