//! V4L2-backed sensor with memory-mapped streaming

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{FrameMeta, PixelFormat, RawFrame};
use crate::capture::sensor::{ControlInfo, Sensor};
use crate::CameraConfig;

fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        PixelFormat::Yuyv => FourCC::new(b"YUYV"),
        PixelFormat::Bayer8 => FourCC::new(b"RGGB"),
        PixelFormat::Bayer16 => FourCC::new(b"RG16"),
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
    }
}

/// One V4L2 capture device exposed through the [`Sensor`] capability set.
///
/// The mmap ring belongs to the kernel; payloads are copied out on dequeue,
/// so `release_frame` has nothing to hand back and the buffer requeues on
/// the next dequeue.
pub struct V4l2Sensor {
    device: Box<Device>,
    stream: Mutex<Option<MmapStream<'static>>>,
    config: CameraConfig,
    card: String,
    driver: String,
    sequence: AtomicU64,
}

impl V4l2Sensor {
    #[instrument(skip(config))]
    pub fn new(config: CameraConfig) -> Result<Self> {
        info!("Opening V4L2 device: {}", config.device.path);

        let device = Device::with_path(&config.device.path)?;
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = fourcc(config.device.format);
        device.set_format(&fmt)?;

        Ok(Self {
            device: Box::new(device),
            card: caps.card.trim().to_string(),
            driver: caps.driver.trim().to_string(),
            stream: Mutex::new(None),
            config,
            sequence: AtomicU64::new(0),
        })
    }
}

impl Sensor for V4l2Sensor {
    fn name(&self) -> &str {
        &self.card
    }

    fn driver_name(&self) -> &str {
        &self.driver
    }

    fn start_stream(&self) -> bool {
        match MmapStream::with_buffers(
            &self.device,
            Type::VideoCapture,
            self.config.buffer_count,
        ) {
            Ok(stream) => {
                *self.stream.lock().unwrap() = Some(stream);
                info!(
                    "Capture stream started with {} buffers",
                    self.config.buffer_count
                );
                true
            }
            Err(e) => {
                warn!("Failed to start capture stream: {e}");
                false
            }
        }
    }

    fn stop_stream(&self) -> bool {
        self.stream.lock().unwrap().take().is_some()
    }

    fn acquire_frame(&self) -> RawFrame {
        let mut guard = self.stream.lock().unwrap();
        let Some(stream) = guard.as_mut() else {
            return RawFrame::default();
        };

        match stream.next() {
            Ok((buf, _meta)) => {
                let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
                RawFrame {
                    data: Bytes::copy_from_slice(buf),
                    meta: FrameMeta {
                        sequence,
                        width: self.config.width,
                        height: self.config.height,
                        stride: self.config.width,
                        format: self.config.device.format,
                    },
                    timestamp: Instant::now(),
                }
            }
            Err(e) => {
                warn!("Frame dequeue failed: {e}");
                RawFrame::default()
            }
        }
    }

    fn release_frame(&self, _frame: RawFrame) {
        // Payload was copied out of the mmap ring at dequeue time.
    }

    fn control(&self, name: &str) -> Option<ControlInfo> {
        let descriptions = self.device.query_controls().ok()?;
        let description = descriptions.into_iter().find(|d| d.name == name)?;

        let value = match self.device.control(description.id) {
            Ok(control) => match control.value {
                v4l::control::Value::Integer(v) => v,
                v4l::control::Value::Boolean(v) => v as i64,
                _ => 0,
            },
            Err(_) => 0,
        };

        let menu = description
            .items
            .map(|items| {
                items
                    .into_iter()
                    .map(|(_, item)| item.to_string())
                    .collect()
            })
            .unwrap_or_default();

        Some(ControlInfo { value, menu })
    }

    fn set_control(&self, name: &str, value: i64) -> bool {
        let Ok(descriptions) = self.device.query_controls() else {
            return false;
        };
        let Some(description) = descriptions.into_iter().find(|d| d.name == name) else {
            return false;
        };
        self.device
            .set_control(v4l::control::Control {
                id: description.id,
                value: v4l::control::Value::Integer(value),
            })
            .is_ok()
    }
}
