//! Argus multi-camera viewer: capture, decode and process frames from every
//! configured sensor and present the streams in one display loop.

use std::sync::Arc;

use argus::{
    utils, CameraOptions, Config, DisplayEngine, ImageSnapshotWriter, Pipeline, Sdl2Presenter,
    Sensor, V4l2Sensor,
};
use color_eyre::{eyre::eyre, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("argus=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Argus launching...");

    let mut config = Config::load();

    // Auto-detect capture devices when none are configured
    if config.cameras.is_empty() {
        let mut cameras = Vec::new();
        for device in utils::auto_detect_devices().await? {
            cameras.push(argus::CameraConfig {
                device,
                ..argus::CameraConfig::default()
            });
        }
        config.cameras = cameras;
    }

    argus::CONFIG.store(Arc::new(config.clone()));

    let topology = config.topology();
    let mut pipelines = Vec::new();
    for camera in &config.cameras {
        let sensor: Arc<dyn Sensor> = Arc::new(V4l2Sensor::new(camera.clone())?);
        let options = CameraOptions {
            debayer: camera.debayer,
            resize: camera.resize,
        };
        let pipeline = Pipeline::new(sensor, options, topology);
        info!(
            pipeline = pipeline.name(),
            role = ?pipeline.role(),
            "configured pipeline"
        );
        pipelines.push(pipeline);
    }

    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let presenter = Sdl2Presenter::new(&sdl_context)?;
    let snapshots = ImageSnapshotWriter::new(config.snapshot.directory.clone());

    let mut engine = DisplayEngine::new(pipelines, presenter, snapshots)?;

    // Ctrl-C behaves like the quit hotkey.
    let pending = engine.pending();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            pending.request_quit();
        }
    });

    engine.run()?;

    info!("Argus shutting down");
    Ok(())
}
