//! Color/geometry processing: decoded pixels to a displayable RGB frame.
//!
//! The toggles live in [`ProcessControls`], shared between the display loop
//! (which flips them) and the process stage (which snapshots them once per
//! frame). Bit-exact imaging math is explicitly not a goal here.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::capture::frame::{DecodedFrame, DisplayFrame};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResizeOptions {
    pub enable: bool,
    pub width: u32,
    pub height: u32,
}

/// One-frame snapshot of the processing toggles.
#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    pub debayer: bool,
    pub resize: Option<(u32, u32)>,
    pub crosshair: bool,
    pub show_fps: bool,
    pub acquisition_fps: u32,
    pub display_fps: u32,
}

/// Runtime-tunable processing state for one pipeline.
///
/// Flags are plain atomics; the resize target swaps as a unit so the
/// process stage never observes a half-written width/height pair.
pub struct ProcessControls {
    debayer: AtomicBool,
    crosshair: AtomicBool,
    show_fps: AtomicBool,
    resize: ArcSwap<ResizeOptions>,
    acquisition_fps: AtomicU32,
    display_fps: AtomicU32,
}

impl Default for ProcessControls {
    fn default() -> Self {
        Self {
            debayer: AtomicBool::new(false),
            crosshair: AtomicBool::new(false),
            show_fps: AtomicBool::new(true),
            resize: ArcSwap::from_pointee(ResizeOptions::default()),
            acquisition_fps: AtomicU32::new(0),
            display_fps: AtomicU32::new(0),
        }
    }
}

impl ProcessControls {
    pub fn set_debayer(&self, enable: bool) {
        self.debayer.store(enable, Ordering::Relaxed);
    }

    pub fn set_resize_options(&self, options: ResizeOptions) {
        self.resize.store(std::sync::Arc::new(options));
    }

    pub fn toggle_crosshair(&self) {
        self.crosshair.fetch_xor(true, Ordering::Relaxed);
    }

    pub fn toggle_show_fps(&self) {
        self.show_fps.fetch_xor(true, Ordering::Relaxed);
    }

    pub fn set_fps(&self, acquisition: u32, display: u32) {
        self.acquisition_fps.store(acquisition, Ordering::Relaxed);
        self.display_fps.store(display, Ordering::Relaxed);
    }

    pub fn show_fps(&self) -> bool {
        self.show_fps.load(Ordering::Relaxed)
    }

    pub fn crosshair(&self) -> bool {
        self.crosshair.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProcessOptions {
        let resize = **self.resize.load();
        ProcessOptions {
            debayer: self.debayer.load(Ordering::Relaxed),
            resize: resize.enable.then_some((resize.width, resize.height)),
            crosshair: self.crosshair.load(Ordering::Relaxed),
            show_fps: self.show_fps.load(Ordering::Relaxed),
            acquisition_fps: self.acquisition_fps.load(Ordering::Relaxed),
            display_fps: self.display_fps.load(Ordering::Relaxed),
        }
    }
}

/// Processing collaborator: pure transform from decoded pixels to RGB24.
pub trait Processor: Send + Sync {
    fn process(&self, input: &DecodedFrame, options: &ProcessOptions, out: &mut DisplayFrame);
}

/// CPU processor: bit-depth conversion, RGGB demosaic, nearest resize,
/// crosshair and FPS overlay.
#[derive(Debug, Default)]
pub struct SoftwareProcessor;

impl Processor for SoftwareProcessor {
    fn process(&self, input: &DecodedFrame, options: &ProcessOptions, out: &mut DisplayFrame) {
        if !input.is_valid() {
            out.clear();
            return;
        }

        if input.bayer {
            // Converting down to 8 bit before demosaicing keeps the rest of
            // the chain working on the smaller image.
            let mono = to_8bit(input);
            if options.debayer {
                debayer_rggb(&mono, input.width, input.height, out);
            } else {
                gray_to_rgb(&mono, input.width, input.height, out);
            }
        } else {
            // Decoders may hand back luma-only pixels (grayscale JPEG);
            // anything that is neither RGB24 nor luma sized is unusable and
            // must not reach the slicing overlay code below.
            let pixels = (input.width * input.height) as usize;
            if input.data.len() == pixels * 3 {
                out.data.clear();
                out.data.extend_from_slice(&input.data);
                out.width = input.width;
                out.height = input.height;
            } else if input.data.len() == pixels {
                gray_to_rgb(&input.data, input.width, input.height, out);
            } else {
                out.clear();
                return;
            }
        }

        if let Some((width, height)) = options.resize {
            resize_nearest(out, width, height);
        }

        if options.crosshair {
            draw_crosshair(out);
        }

        if options.show_fps {
            draw_fps(out, options.acquisition_fps, options.display_fps);
        }
    }
}

fn to_8bit(input: &DecodedFrame) -> Vec<u8> {
    match input.bit_depth {
        16 => input
            .data
            .chunks_exact(2)
            .map(|pair| (u16::from_le_bytes([pair[0], pair[1]]) >> 8) as u8)
            .collect(),
        _ => input.data.clone(),
    }
}

fn gray_to_rgb(mono: &[u8], width: u32, height: u32, out: &mut DisplayFrame) {
    let pixels = (width * height) as usize;
    out.data.clear();
    out.data.reserve(pixels * 3);
    for &v in &mono[..pixels.min(mono.len())] {
        out.data.extend_from_slice(&[v, v, v]);
    }
    out.data.resize(pixels * 3, 0);
    out.width = width;
    out.height = height;
}

/// 2x2 block demosaic assuming an RGGB filter layout.
fn debayer_rggb(mono: &[u8], width: u32, height: u32, out: &mut DisplayFrame) {
    let (w, h) = (width as usize, height as usize);
    if mono.len() < w * h || w < 2 || h < 2 {
        out.clear();
        return;
    }

    out.data.clear();
    out.data.resize(w * h * 3, 0);

    for y in 0..h {
        for x in 0..w {
            // Clamp to the top-left sample of the containing 2x2 cell.
            let cx = (x & !1).min(w - 2);
            let cy = (y & !1).min(h - 2);
            let r = mono[cy * w + cx];
            let g0 = mono[cy * w + cx + 1] as u16;
            let g1 = mono[(cy + 1) * w + cx] as u16;
            let b = mono[(cy + 1) * w + cx + 1];
            let base = (y * w + x) * 3;
            out.data[base] = r;
            out.data[base + 1] = ((g0 + g1) / 2) as u8;
            out.data[base + 2] = b;
        }
    }
    out.width = width;
    out.height = height;
}

fn resize_nearest(frame: &mut DisplayFrame, width: u32, height: u32) {
    if width == 0 || height == 0 || (width == frame.width && height == frame.height) {
        return;
    }
    let (sw, sh) = (frame.width as usize, frame.height as usize);
    let (dw, dh) = (width as usize, height as usize);
    let mut resized = vec![0u8; dw * dh * 3];

    for y in 0..dh {
        let sy = y * sh / dh;
        for x in 0..dw {
            let sx = x * sw / dw;
            let src = (sy * sw + sx) * 3;
            let dst = (y * dw + x) * 3;
            resized[dst..dst + 3].copy_from_slice(&frame.data[src..src + 3]);
        }
    }

    frame.data = resized;
    frame.width = width;
    frame.height = height;
}

fn draw_crosshair(frame: &mut DisplayFrame) {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let (cx, cy) = (w / 2, h / 2);
    for x in 0..w {
        let base = (cy * w + x) * 3;
        frame.data[base..base + 3].copy_from_slice(&[255, 0, 0]);
    }
    for y in 0..h {
        let base = (y * w + cx) * 3;
        frame.data[base..base + 3].copy_from_slice(&[255, 0, 0]);
    }
}

// 3x5 glyphs for the FPS overlay, one bit per pixel, top row first.
const GLYPH_ROWS: usize = 5;
const GLYPH_COLS: usize = 3;

fn glyph(c: char) -> Option<[u8; GLYPH_ROWS]> {
    Some(match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        _ => return None,
    })
}

fn draw_fps(frame: &mut DisplayFrame, acquisition_fps: u32, display_fps: u32) {
    let text = format!("A:{acquisition_fps} D:{display_fps}");
    let scale = 2usize;
    let (w, h) = (frame.width as usize, frame.height as usize);
    let mut pen_x = 4usize;
    let pen_y = 4usize;

    for c in text.chars() {
        if let Some(rows) = glyph(c) {
            for (gy, row) in rows.iter().enumerate() {
                for gx in 0..GLYPH_COLS {
                    if row & (1 << (GLYPH_COLS - 1 - gx)) == 0 {
                        continue;
                    }
                    for sy in 0..scale {
                        for sx in 0..scale {
                            let x = pen_x + gx * scale + sx;
                            let y = pen_y + gy * scale + sy;
                            if x < w && y < h {
                                let base = (y * w + x) * 3;
                                frame.data[base..base + 3].copy_from_slice(&[0, 255, 0]);
                            }
                        }
                    }
                }
            }
        }
        pen_x += (GLYPH_COLS + 1) * scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded_rgb(width: u32, height: u32, fill: u8) -> DecodedFrame {
        DecodedFrame {
            data: vec![fill; (width * height * 3) as usize],
            width,
            height,
            bit_depth: 8,
            bayer: false,
        }
    }

    fn plain_options() -> ProcessOptions {
        ProcessOptions {
            debayer: false,
            resize: None,
            crosshair: false,
            show_fps: false,
            acquisition_fps: 0,
            display_fps: 0,
        }
    }

    #[test]
    fn invalid_input_produces_invalid_output() {
        let mut out = DisplayFrame::default();
        out.data = vec![1; 12];
        SoftwareProcessor.process(&DecodedFrame::default(), &plain_options(), &mut out);
        assert!(!out.is_valid());
    }

    #[test]
    fn resize_changes_dimensions() {
        let input = decoded_rgb(8, 8, 50);
        let mut options = plain_options();
        options.resize = Some((4, 2));
        let mut out = DisplayFrame::default();
        SoftwareProcessor.process(&input, &options, &mut out);
        assert_eq!((out.width, out.height), (4, 2));
        assert!(out.is_valid());
    }

    #[test]
    fn crosshair_marks_the_center() {
        let input = decoded_rgb(9, 9, 10);
        let mut options = plain_options();
        options.crosshair = true;
        let mut out = DisplayFrame::default();
        SoftwareProcessor.process(&input, &options, &mut out);
        let center = ((4 * 9 + 4) * 3) as usize;
        assert_eq!(&out.data[center..center + 3], &[255, 0, 0]);
        // A corner away from the cross is untouched.
        assert_eq!(&out.data[0..3], &[10, 10, 10]);
    }

    #[test]
    fn luma_input_expands_to_rgb_before_overlays() {
        // A grayscale source decodes to one byte per pixel; overlays must
        // see a full RGB24 buffer, not slice past the short one.
        let input = DecodedFrame {
            data: vec![80u8; 64 * 48],
            width: 64,
            height: 48,
            bit_depth: 8,
            bayer: false,
        };
        let mut options = plain_options();
        options.crosshair = true;
        let mut out = DisplayFrame::default();
        SoftwareProcessor.process(&input, &options, &mut out);
        assert!(out.is_valid());
        assert_eq!(out.data.len(), 64 * 48 * 3);
        assert_eq!(&out.data[0..3], &[80, 80, 80]);
        let center = ((24 * 64 + 32) * 3) as usize;
        assert_eq!(&out.data[center..center + 3], &[255, 0, 0]);
    }

    #[test]
    fn mismatched_payload_yields_invalid_output() {
        // Neither RGB24 nor luma sized: refuse it instead of overlaying.
        let input = DecodedFrame {
            data: vec![0u8; 64 * 48 * 2],
            width: 64,
            height: 48,
            bit_depth: 8,
            bayer: false,
        };
        let mut options = plain_options();
        options.crosshair = true;
        options.resize = Some((32, 32));
        let mut out = DisplayFrame::default();
        SoftwareProcessor.process(&input, &options, &mut out);
        assert!(!out.is_valid());
    }

    #[test]
    fn debayer_rggb_recovers_solid_color() {
        // Uniform RGGB mosaic of a pure red scene: R=200, G=0, B=0.
        let (w, h) = (4u32, 4u32);
        let mut mosaic = vec![0u8; 16];
        for y in 0..4 {
            for x in 0..4 {
                if y % 2 == 0 && x % 2 == 0 {
                    mosaic[y * 4 + x] = 200;
                }
            }
        }
        let input = DecodedFrame {
            data: mosaic,
            width: w,
            height: h,
            bit_depth: 8,
            bayer: true,
        };
        let mut options = plain_options();
        options.debayer = true;
        let mut out = DisplayFrame::default();
        SoftwareProcessor.process(&input, &options, &mut out);
        assert_eq!(&out.data[0..3], &[200, 0, 0]);
    }

    #[test]
    fn sixteen_bit_bayer_converts_before_display() {
        let input = DecodedFrame {
            data: vec![0xff; 2 * 2 * 2],
            width: 2,
            height: 2,
            bit_depth: 16,
            bayer: true,
        };
        let mut out = DisplayFrame::default();
        SoftwareProcessor.process(&input, &plain_options(), &mut out);
        assert!(out.is_valid());
        assert_eq!(out.data[0], 0xff);
    }

    #[test]
    fn controls_snapshot_is_consistent() {
        let controls = ProcessControls::default();
        controls.set_debayer(true);
        controls.toggle_crosshair();
        controls.toggle_show_fps();
        controls.set_resize_options(ResizeOptions {
            enable: true,
            width: 320,
            height: 240,
        });
        controls.set_fps(30, 25);

        let snapshot = controls.snapshot();
        assert!(snapshot.debayer);
        assert!(snapshot.crosshair);
        assert!(!snapshot.show_fps);
        assert_eq!(snapshot.resize, Some((320, 240)));
        assert_eq!((snapshot.acquisition_fps, snapshot.display_fps), (30, 25));
    }
}
