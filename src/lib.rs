//! Pi-Cam-Source: a pull-based frame source over callback-driven camera drivers
//!
//! The driver pushes frames from its own callback thread; the consumer pulls
//! exactly one frame per call. A single-slot handoff channel connects the
//! two, and a configuration store applies property changes to the hardware in
//! a fixed order before every capture.

pub mod config;
pub mod device;
pub mod handoff;
pub mod mock;
pub mod mode;
pub mod source;
pub mod traits;
pub mod validation;

pub use config::{ConfigStore, Field, Rotation, Setting, VideoOrientation, WhiteBalance};
pub use device::V4L2Driver;
pub use handoff::{ArmOutcome, DeliverOutcome, FrameChannel, SlotState};
pub use mode::{CapsRequest, SensorMode};
pub use source::{CameraSource, PullOutcome, RunState};
pub use traits::{
    CameraError, ControlId, DeviceDriver, Format, FourCC, Frame, FrameCallback, FrameMetadata,
};
