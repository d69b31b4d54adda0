//! Core traits and types shared by the frame source and its device drivers.

use std::time::Duration;

use thiserror::Error;

use crate::mode::SensorMode;

/// Pixel format representation (e.g., GREY, Y10P, BA81).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// 8-bit greyscale, the only format delivered downstream.
    pub const GREY: Self = Self::new(b"GREY");
    /// 10-bit packed greyscale.
    pub const Y10P: Self = Self::new(b"Y10P");
    /// 8-bit Bayer BGGR.
    pub const BA81: Self = Self::new(b"BA81");
    /// 10-bit packed Bayer BGGR.
    pub const PBAA: Self = Self::new(b"pBAA");
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format description.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let stride = width; // GREY is 1 byte per pixel
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }
}

impl Default for Format {
    /// The sensor's power-on output: 160x100 GREY.
    fn default() -> Self {
        Self::new(160, 100, FourCC::GREY)
    }
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number within the current streaming session.
    pub sequence: u32,
    /// Time since the streaming session started.
    pub timestamp: Duration,
    /// Bytes delivered by the driver.
    pub bytes_used: u32,
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data, in whatever layout the device produced.
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

/// Identifier of a hardware control, using V4L2 control ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlId(pub u32);

const V4L2_CID_BASE: u32 = 0x0098_0900;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = 0x009a_0900;

impl ControlId {
    /// Automatic white balance on/off.
    pub const AUTO_WHITE_BALANCE: Self = Self(V4L2_CID_BASE + 12);
    /// Manual exposure (shutter) value.
    pub const EXPOSURE: Self = Self(V4L2_CID_BASE + 17);
    /// Analogue gain.
    pub const GAIN: Self = Self(V4L2_CID_BASE + 19);
    /// Horizontal flip.
    pub const HFLIP: Self = Self(V4L2_CID_BASE + 20);
    /// Vertical flip.
    pub const VFLIP: Self = Self(V4L2_CID_BASE + 21);
    /// White balance temperature in Kelvin.
    pub const WHITE_BALANCE_TEMPERATURE: Self = Self(V4L2_CID_BASE + 26);
    /// Image rotation in degrees.
    pub const ROTATE: Self = Self(V4L2_CID_BASE + 34);
    /// Exposure mode menu, see [`EXPOSURE_AUTO`] and [`EXPOSURE_MANUAL`].
    pub const EXPOSURE_AUTO: Self = Self(V4L2_CID_CAMERA_CLASS_BASE + 1);
    /// Vendor extension: external trigger mode.
    pub const EXTERNAL_TRIGGER: Self = Self(V4L2_CID_BASE + 0x1000 + 1);
}

impl std::fmt::Display for ControlId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// `EXPOSURE_AUTO` menu value: automatic exposure.
pub const EXPOSURE_AUTO: i64 = 0;
/// `EXPOSURE_AUTO` menu value: manual exposure.
pub const EXPOSURE_MANUAL: i64 = 1;

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Requested format is not supported.
    #[error("Format not supported: {0:?}")]
    FormatNotSupported(Format),
    /// Requested sensor mode does not fit the requested resolution.
    #[error("Sensor mode {mode} not valid for {width}x{height}")]
    InvalidMode {
        /// Requested sensor mode number.
        mode: i32,
        /// Negotiated width.
        width: u32,
        /// Negotiated height.
        height: u32,
    },
    /// A control write or read was rejected by the device.
    #[error("Control {control} failed: {message}")]
    ControlFailed {
        /// Control that failed.
        control: ControlId,
        /// Driver message.
        message: String,
    },
    /// A property value is outside its declared range.
    #[error("Value {value} out of range for {property}")]
    OutOfRange {
        /// Property name.
        property: &'static str,
        /// Rejected value.
        value: i64,
    },
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// Frame callback registration failed; the source did not start.
    #[error("Failed to start streaming: {0}")]
    RegistrationFailed(String),
    /// The source is not streaming and will not start on its own.
    #[error("Source not started")]
    NotStarted,
    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Closure invoked by a driver for every frame it has ready.
///
/// The driver calls it synchronously from its own callback context and must
/// consider its buffer in use until the call returns.
pub type FrameCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Abstraction over a callback-driven camera driver.
///
/// Opening the device (`init`) is the implementation's constructor. A driver
/// handle is shared between sources, so every method takes `&self`.
pub trait DeviceDriver: Send + Sync {
    /// Name reported by the sensor.
    fn sensor_name(&self) -> String;

    /// Release the device.
    fn close(&self) -> Result<()>;

    /// Select a vendor sensor mode.
    fn set_mode(&self, mode: SensorMode) -> Result<()>;

    /// Set capture resolution. Returns the resolution chosen by the driver.
    fn set_resolution(&self, width: u32, height: u32) -> Result<(u32, u32)>;

    /// Write a single control.
    fn set_control(&self, id: ControlId, value: i64) -> Result<()>;

    /// Read back a single control.
    fn get_control(&self, id: ControlId) -> Result<i64>;

    /// Install the frame callback and start streaming.
    fn register_frame_callback(&self, callback: FrameCallback) -> Result<()>;

    /// Stop streaming and drop the installed callback.
    fn unregister_frame_callback(&self) -> Result<()>;
}
