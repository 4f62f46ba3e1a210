//! Format negotiation: `(codec kind, geometry)` -> negotiated format pair.
//!
//! The mapping from codec kind to device constants is an explicit immutable
//! [`FormatTable`] handed to each session, not process-wide state, so
//! independent sessions can carry different device bindings.

use crate::device::PixelFormat;
use crate::error::{CodecError, CodecResult};

/// Video codec selected when a session opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecKind {
    H264,
    H265,
    Vp8,
    Vp9,
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CodecKind::H264 => "h264",
            CodecKind::H265 => "h265",
            CodecKind::Vp8 => "vp8",
            CodecKind::Vp9 => "vp9",
        };
        write!(f, "{}", name)
    }
}

/// One table row: codec kind and the compressed-stream format it produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodecEntry {
    pub kind: CodecKind,
    pub stream_format: PixelFormat,
}

/// Immutable negotiation table: geometry maxima plus the supported codec set.
#[derive(Clone, Debug)]
pub struct FormatTable {
    max_width: u32,
    max_height: u32,
    entries: Vec<CodecEntry>,
}

impl Default for FormatTable {
    fn default() -> Self {
        Self::new(
            4096,
            2160,
            vec![
                CodecEntry {
                    kind: CodecKind::H264,
                    stream_format: PixelFormat::H264,
                },
                CodecEntry {
                    kind: CodecKind::H265,
                    stream_format: PixelFormat::Hevc,
                },
                CodecEntry {
                    kind: CodecKind::Vp8,
                    stream_format: PixelFormat::Vp8,
                },
                CodecEntry {
                    kind: CodecKind::Vp9,
                    stream_format: PixelFormat::Vp9,
                },
            ],
        )
    }
}

impl FormatTable {
    pub fn new(max_width: u32, max_height: u32, entries: Vec<CodecEntry>) -> Self {
        Self {
            max_width,
            max_height,
            entries,
        }
    }

    pub fn max_width(&self) -> u32 {
        self.max_width
    }

    pub fn max_height(&self) -> u32 {
        self.max_height
    }

    pub fn supports(&self, kind: CodecKind) -> bool {
        self.entries.iter().any(|e| e.kind == kind)
    }

    /// Resolve the format pair for `(kind, width, height)`.
    ///
    /// Pure and deterministic; safe to call repeatedly. The input format is
    /// always NV12 because the device accepts a single raw layout.
    pub fn negotiate(
        &self,
        kind: CodecKind,
        width: u32,
        height: u32,
    ) -> CodecResult<NegotiatedFormat> {
        if width == 0 || height == 0 || width > self.max_width || height > self.max_height {
            return Err(CodecError::InvalidGeometry { width, height });
        }
        let entry = self
            .entries
            .iter()
            .find(|e| e.kind == kind)
            .ok_or(CodecError::UnsupportedCodec(kind))?;
        Ok(NegotiatedFormat {
            width,
            height,
            input_format: PixelFormat::Nv12,
            output_format: entry.stream_format,
        })
    }
}

/// Geometry and directional format pair agreed on during configure, fixed
/// until the session returns to Open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
    pub input_format: PixelFormat,
    pub output_format: PixelFormat,
}
