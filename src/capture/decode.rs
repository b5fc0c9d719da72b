//! Sensor-specific decode: raw payload to unpacked pixels.

use tracing::warn;

use crate::capture::frame::{DecodedFrame, PixelFormat, RawFrame};

/// Decode collaborator. Implementations fill `out` in place; on failure they
/// clear it, which publishes an invalid frame for downstream to skip.
pub trait Decoder: Send + Sync {
    fn decode(&self, raw: &RawFrame, out: &mut DecodedFrame);
}

/// Default decoder covering the formats the capture layer negotiates.
#[derive(Debug, Default)]
pub struct FormatDecoder;

impl Decoder for FormatDecoder {
    fn decode(&self, raw: &RawFrame, out: &mut DecodedFrame) {
        match raw.meta.format {
            PixelFormat::Mjpeg => decode_mjpeg(raw, out),
            PixelFormat::Yuyv => decode_yuyv(raw, out),
            PixelFormat::Rgb24 => {
                out.data.clear();
                out.data.extend_from_slice(&raw.data);
                out.width = raw.meta.width;
                out.height = raw.meta.height;
                out.bit_depth = 8;
                out.bayer = false;
            }
            PixelFormat::Bayer8 | PixelFormat::Bayer16 => {
                // Bayer data stays mosaiced; demosaicing is a processing
                // concern, gated by the debayer toggle.
                out.data.clear();
                out.data.extend_from_slice(&raw.data);
                out.width = raw.meta.width;
                out.height = raw.meta.height;
                out.bit_depth = if raw.meta.format == PixelFormat::Bayer16 {
                    16
                } else {
                    8
                };
                out.bayer = true;
            }
        }
    }
}

fn decode_mjpeg(raw: &RawFrame, out: &mut DecodedFrame) {
    let mut decoder = zune_jpeg::JpegDecoder::new(&raw.data[..]);
    match decoder.decode() {
        Ok(pixels) => {
            let (width, height) = decoder
                .dimensions()
                .map(|(w, h)| (w as u32, h as u32))
                .unwrap_or((raw.meta.width, raw.meta.height));
            out.data = pixels;
            out.width = width;
            out.height = height;
            out.bit_depth = 8;
            out.bayer = false;
        }
        Err(e) => {
            warn!(sequence = raw.meta.sequence, "MJPEG decode failed: {e}");
            out.clear();
        }
    }
}

fn decode_yuyv(raw: &RawFrame, out: &mut DecodedFrame) {
    let width = raw.meta.width as usize;
    let height = raw.meta.height as usize;
    if raw.data.len() < width * height * 2 {
        warn!(sequence = raw.meta.sequence, "short YUYV payload");
        out.clear();
        return;
    }

    out.data.clear();
    out.data.reserve(width * height * 3);

    // YUYV packs two pixels into four bytes: Y0 U Y1 V.
    for chunk in raw.data[..width * height * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (
            chunk[0] as f32,
            chunk[1] as f32 - 128.0,
            chunk[2] as f32,
            chunk[3] as f32 - 128.0,
        );
        for y in [y0, y1] {
            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
            out.data.extend_from_slice(&[r, g, b]);
        }
    }
    out.width = raw.meta.width;
    out.height = raw.meta.height;
    out.bit_depth = 8;
    out.bayer = false;
}
