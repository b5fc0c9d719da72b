//! Sensor capability surface consumed by the pipeline core.
//!
//! The driver layer behind this trait (buffer queueing, ioctls, DMA) is not
//! modeled here; the pipeline only needs stream lifecycle, frame handout and
//! a small set of named controls.

use crate::capture::frame::RawFrame;

/// Name of the menu control carrying the hardware synchronization role.
pub const OPERATION_MODE_CONTROL: &str = "Operation Mode";

/// Menu entry marking a sensor that drives the sync signal.
pub const MASTER_MODE_ENTRY: &str = "Master Mode";

/// Control that switches the driver into blocking frame fetch.
pub const FETCH_BLOCKING_CONTROL: &str = "Fetch Blocking";

/// Snapshot of a sensor control.
///
/// `menu` is empty for non-menu controls; for menu controls `value` indexes
/// into it (the driver may report an out-of-range index, callers must not
/// assume it is valid).
#[derive(Debug, Clone, Default)]
pub struct ControlInfo {
    pub value: i64,
    pub menu: Vec<String>,
}

/// One image sensor, shared between a capture stage and the code that
/// started it. Frames acquired from a sensor must eventually be handed back
/// through [`Sensor::release_frame`] so the driver can requeue the buffer.
pub trait Sensor: Send + Sync {
    fn name(&self) -> &str;

    fn driver_name(&self) -> &str;

    /// Begin streaming. Returns false when the hardware refuses.
    fn start_stream(&self) -> bool;

    /// Halt streaming. Returns false when the hardware refuses.
    fn stop_stream(&self) -> bool;

    /// Hand out one frame. May return an invalid frame when no data is
    /// available; that is not an error.
    fn acquire_frame(&self) -> RawFrame;

    /// Return a previously acquired frame to the driver.
    fn release_frame(&self, frame: RawFrame);

    /// Look up a control by its driver-reported name.
    fn control(&self, name: &str) -> Option<ControlInfo>;

    /// Apply a named control. Returns false when the control is missing or
    /// the driver rejects the value.
    fn set_control(&self, name: &str, value: i64) -> bool;
}
