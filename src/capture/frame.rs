use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Yuyv,
    Mjpeg,
    Bayer8,
    Bayer16,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMeta {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

impl Default for FrameMeta {
    fn default() -> Self {
        Self {
            sequence: 0,
            width: 0,
            height: 0,
            stride: 0,
            format: PixelFormat::Rgb24,
        }
    }
}

/// Raw frame as produced by a sensor, with zero-copy payload semantics.
///
/// An empty payload is a valid value: it marks a cycle where the sensor had
/// nothing to hand out. Consumers check [`RawFrame::is_valid`] and skip.
#[derive(Clone)]
pub struct RawFrame {
    /// Immutable frame data - shared across threads without copying
    pub data: Bytes,

    pub meta: FrameMeta,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

impl RawFrame {
    pub fn is_valid(&self) -> bool {
        !self.data.is_empty()
    }
}

impl Default for RawFrame {
    fn default() -> Self {
        Self {
            data: Bytes::new(),
            meta: FrameMeta::default(),
            timestamp: Instant::now(),
        }
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// Decoded frame: unpacked pixels, still in the sensor's color space.
///
/// `bit_depth` is 8 or 16; 16-bit data is stored little-endian, one sample
/// per two bytes. `bayer` marks data that still needs demosaicing.
#[derive(Debug, Clone, Default)]
pub struct DecodedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub bayer: bool,
}

impl DecodedFrame {
    pub fn is_valid(&self) -> bool {
        !self.data.is_empty() && self.width > 0 && self.height > 0
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
    }
}

/// Displayable frame: tightly packed RGB24.
#[derive(Debug, Clone, Default)]
pub struct DisplayFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DisplayFrame {
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width * self.height * 3) as usize
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
    }
}
