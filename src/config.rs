use std::path::Path;

use serde::{Deserialize, Serialize};

use m2m_bus::device::PixelFormat;
use m2m_bus::format::{CodecEntry, CodecKind, FormatTable};
use m2m_bus::session::SessionConfig;

/// Process configuration, loadable from a JSON file. The codec table it
/// produces is handed to each session explicitly so independent sessions can
/// run against different device bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub width: u32,
    pub height: u32,
    pub input_buffers: u32,
    pub output_buffers: u32,
    /// Enabled codec names: "h264", "h265", "vp8", "vp9".
    pub codecs: Vec<String>,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            max_width: 4096,
            max_height: 2160,
            width: 1920,
            height: 1080,
            input_buffers: 4,
            output_buffers: 4,
            codecs: vec![
                "h264".to_string(),
                "h265".to_string(),
                "vp8".to_string(),
                "vp9".to_string(),
            ],
        }
    }
}

impl HalConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: HalConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn format_table(&self) -> anyhow::Result<FormatTable> {
        let mut entries = Vec::new();
        for name in &self.codecs {
            let kind = parse_codec(name)?;
            entries.push(CodecEntry {
                kind,
                stream_format: stream_format_for(kind),
            });
        }
        Ok(FormatTable::new(self.max_width, self.max_height, entries))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.width, self.height)
            .with_buffers(self.input_buffers, self.output_buffers)
    }
}

fn parse_codec(name: &str) -> anyhow::Result<CodecKind> {
    match name {
        "h264" => Ok(CodecKind::H264),
        "h265" | "hevc" => Ok(CodecKind::H265),
        "vp8" => Ok(CodecKind::Vp8),
        "vp9" => Ok(CodecKind::Vp9),
        other => Err(anyhow::anyhow!("unknown codec name: {}", other)),
    }
}

fn stream_format_for(kind: CodecKind) -> PixelFormat {
    match kind {
        CodecKind::H264 => PixelFormat::H264,
        CodecKind::H265 => PixelFormat::Hevc,
        CodecKind::Vp8 => PixelFormat::Vp8,
        CodecKind::Vp9 => PixelFormat::Vp9,
    }
}
