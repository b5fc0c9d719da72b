pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::capture::frame::PixelFormat;
use crate::pipeline::process::ResizeOptions;
use crate::utils::FoundDevice;

pub use crate::capture::{Decoder, FormatDecoder, Sensor, V4l2Sensor};
pub use crate::display::{DisplayEngine, ImageSnapshotWriter, Sdl2Presenter};
pub use crate::error::{DisplayError, PipelineError, SnapshotError, StageError};
pub use crate::pipeline::{CameraOptions, Pipeline, SyncRole, Topology};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub cameras: Vec<CameraConfig>,
    pub pipeline: PipelineConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_count: u32,
    pub debayer: bool,
    pub resize: ResizeOptions,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: FoundDevice::new("/dev/video0".into(), PixelFormat::Mjpeg),
            width: 800,
            height: 600,
            fps: 30,
            buffer_count: 4,
            debayer: false,
            resize: ResizeOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Collapse decode+process into the consumer's pull instead of giving
    /// each stage its own thread. For hosts where three threads per camera
    /// are too many.
    pub sequential: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { sequential: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub directory: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            directory: ".".into(),
        }
    }
}

impl Config {
    /// Layered load: `argus.toml` in the working directory, then `ARGUS_*`
    /// environment overrides, then defaults for everything unset.
    pub fn load() -> Self {
        let loaded = config::Config::builder()
            .add_source(config::File::with_name("argus").required(false))
            .add_source(config::Environment::with_prefix("ARGUS").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize());

        match loaded {
            Ok(config) => config,
            Err(e) => {
                warn!("Falling back to default configuration: {e}");
                Self::default()
            }
        }
    }

    pub fn topology(&self) -> Topology {
        if self.pipeline.sequential {
            Topology::Sequential
        } else {
            Topology::Parallel
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_parallel_with_no_cameras_configured() {
        let config = Config::default();
        assert_eq!(config.topology(), Topology::Parallel);
        // An empty camera list means auto-detection at startup.
        assert!(config.cameras.is_empty());
    }

    #[test]
    fn sequential_flag_selects_the_collapsed_topology() {
        let config = Config {
            pipeline: PipelineConfig { sequential: true },
            ..Config::default()
        };
        assert_eq!(config.topology(), Topology::Sequential);
    }
}
