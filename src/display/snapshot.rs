//! Snapshot writing: one-shot saves of the currently displayed frame.

use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use tracing::info;

use crate::capture::frame::DisplayFrame;
use crate::error::SnapshotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFormat {
    Png,
    Jpeg,
    Tiff,
}

impl SaveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Tiff => "tiff",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            SaveFormat::Png => ImageFormat::Png,
            SaveFormat::Jpeg => ImageFormat::Jpeg,
            SaveFormat::Tiff => ImageFormat::Tiff,
        }
    }
}

pub trait SnapshotSink {
    fn save(
        &mut self,
        frame: &DisplayFrame,
        name: &str,
        format: SaveFormat,
    ) -> Result<(), SnapshotError>;
}

/// Writes `<dir>/<name>_<n>.<ext>`, picking the first free index so
/// existing snapshots are never overwritten.
pub struct ImageSnapshotWriter {
    directory: PathBuf,
}

impl ImageSnapshotWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn available_path(&self, name: &str, extension: &str) -> PathBuf {
        let mut index = 0u32;
        loop {
            let candidate = self.directory.join(format!("{name}_{index}.{extension}"));
            if !candidate.exists() {
                return candidate;
            }
            index += 1;
        }
    }
}

impl Default for ImageSnapshotWriter {
    fn default() -> Self {
        Self::new(Path::new("."))
    }
}

impl SnapshotSink for ImageSnapshotWriter {
    fn save(
        &mut self,
        frame: &DisplayFrame,
        name: &str,
        format: SaveFormat,
    ) -> Result<(), SnapshotError> {
        let image = RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(
            SnapshotError::BadFrame {
                width: frame.width,
                height: frame.height,
            },
        )?;
        let path = self.available_path(name, format.extension());
        image.save_with_format(&path, format.image_format())?;
        info!(path = %path.display(), "saved snapshot");
        Ok(())
    }
}
