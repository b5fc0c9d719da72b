use crate::capture::frame::PixelFormat;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use v4l::{capability::Flags, video::Capture, Device, FourCC};

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Auto-detect all usable capture devices, preferring MJPEG over YUYV.
pub async fn auto_detect_devices() -> Result<Vec<FoundDevice>> {
    use std::path::Path;

    info!("Auto-detecting capture devices...");

    let mut found = Vec::new();

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        let mut best: Option<PixelFormat> = None;
        for fmt in formats {
            if fmt.fourcc == FourCC::new(b"MJPG") {
                best = Some(PixelFormat::Mjpeg);
                break;
            } else if fmt.fourcc == FourCC::new(b"YUYV") && best.is_none() {
                best = Some(PixelFormat::Yuyv);
            }
        }

        if let Some(format) = best {
            info!("Found {:?} device: {} - {}", format, path, caps.card);
            found.push(FoundDevice { path, format });
        }
    }

    if found.is_empty() {
        return Err(eyre!("No suitable capture device found"));
    }
    Ok(found)
}
