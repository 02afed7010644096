//! Camera frames as handed out by the frame source group

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Sensor streams the recording engine and frame source can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    PhotoVideo,
}

/// Which camera group a frame source wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceGroupKind {
    PhotoVideoCamera,
}

/// Capture instant of a frame
///
/// Only compared for equality: the same instant means the same frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameTimestamp(pub i64);

impl std::fmt::Display for FrameTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit blue, green, red, alpha
    Bgra8,
    Rgba8,
    Gray8,
    Gray16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Gray8 => 1,
            PixelFormat::Gray16 => 2,
        }
    }
}

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn byte_len(self, format: PixelFormat) -> usize {
        self.width as usize * self.height as usize * format.bytes_per_pixel()
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Decoded bitmap owned by the frame source
#[derive(Debug)]
pub struct PixelBuffer {
    extent: Extent,
    format: PixelFormat,
    bytes: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(extent: Extent, format: PixelFormat, bytes: Vec<u8>) -> Self {
        Self {
            extent,
            format,
            bytes,
        }
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Read access to the raw pixel bytes
    pub fn lock_read(&self) -> &[u8] {
        &self.bytes
    }
}

/// One frame pulled from the source group
#[derive(Debug, Clone)]
pub struct SensorFrame {
    pub timestamp: FrameTimestamp,
    pub bitmap: Arc<PixelBuffer>,
}

impl SensorFrame {
    pub fn new(timestamp: FrameTimestamp, bitmap: PixelBuffer) -> Self {
        Self {
            timestamp,
            bitmap: Arc::new(bitmap),
        }
    }
}

/// Timestamp of the last frame consumed by ingestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCursor {
    last: Option<FrameTimestamp>,
}

impl FrameCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `timestamp` as consumed; false if it already was
    pub fn advance(&mut self, timestamp: FrameTimestamp) -> bool {
        if self.last == Some(timestamp) {
            return false;
        }
        self.last = Some(timestamp);
        true
    }

    pub fn last(&self) -> Option<FrameTimestamp> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
