pub mod decode;
pub mod frame;
pub mod sensor;
pub mod v4l2;

pub use decode::{Decoder, FormatDecoder};
pub use frame::{DecodedFrame, DisplayFrame, FrameMeta, PixelFormat, RawFrame};
pub use sensor::{ControlInfo, Sensor};
pub use v4l2::V4l2Sensor;
