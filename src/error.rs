//! Error taxonomy for the pipeline core.
//!
//! Per-frame problems (a sensor handing back an empty buffer, a decoder
//! refusing a frame) are not errors at all - invalid frames flow through the
//! pipeline as data and consumers skip them. Only startup, configuration and
//! I/O failures surface here.

use thiserror::Error;

/// Failure raised by a stage lifecycle hook.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage `{stage}` start hook failed: {reason}")]
    StartHook { stage: String, reason: String },
}

/// Failure starting a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),
}

/// Failure in the presentation layer.
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("no pipelines configured")]
    NoPipelines,

    #[error("window `{window}` was never opened")]
    UnknownWindow { window: String },

    #[error("SDL error: {0}")]
    Sdl(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Failure writing a snapshot to disk.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("frame is not a valid {width}x{height} RGB image")]
    BadFrame { width: u32, height: u32 },

    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}
