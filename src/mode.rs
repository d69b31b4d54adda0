//! Sensor modes and resolution negotiation.
//!
//! The sensor only produces a fixed set of resolutions, each tied to a set of
//! vendor modes. Downstream always receives 8-bit greyscale.

use crate::traits::{CameraError, Format, FourCC, Result};

/// Description of one vendor sensor mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeInfo {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Pixel code produced by the sensor in this mode.
    pub fourcc: FourCC,
    /// Maximum frame rate.
    pub fps: u32,
    /// Number of MIPI lanes.
    pub lanes: u8,
    /// External trigger mode variant.
    pub etm: bool,
}

impl std::fmt::Display for ModeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} {} {}fps {}lane{}",
            self.width,
            self.height,
            self.fourcc,
            self.fps,
            self.lanes,
            if self.lanes > 1 { "s" } else { "" }
        )?;
        if self.etm {
            write!(f, " ETM")?;
        }
        Ok(())
    }
}

const fn mode(width: u32, height: u32, fourcc: FourCC, fps: u32, lanes: u8, etm: bool) -> ModeInfo {
    ModeInfo {
        width,
        height,
        fourcc,
        fps,
        lanes,
        etm,
    }
}

/// Vendor mode table, indexed by mode number.
const MODES: [ModeInfo; 23] = [
    mode(1280, 800, FourCC::GREY, 60, 1, false),
    mode(1280, 720, FourCC::GREY, 60, 1, false),
    mode(640, 400, FourCC::GREY, 210, 1, false),
    mode(320, 200, FourCC::GREY, 420, 1, false),
    mode(160, 100, FourCC::GREY, 480, 1, false),
    mode(1280, 800, FourCC::GREY, 480, 2, false),
    mode(1280, 800, FourCC::Y10P, 480, 2, false),
    mode(1280, 800, FourCC::GREY, 60, 1, true),
    mode(1280, 720, FourCC::GREY, 60, 1, true),
    mode(640, 400, FourCC::GREY, 60, 1, true),
    mode(320, 200, FourCC::GREY, 60, 1, true),
    mode(1280, 800, FourCC::GREY, 60, 2, true),
    mode(1280, 800, FourCC::Y10P, 60, 2, true),
    mode(1280, 720, FourCC::GREY, 60, 2, true),
    mode(640, 400, FourCC::GREY, 60, 2, true),
    mode(320, 200, FourCC::GREY, 60, 2, true),
    mode(1280, 800, FourCC::BA81, 60, 1, false),
    mode(1280, 720, FourCC::BA81, 60, 1, false),
    mode(640, 400, FourCC::BA81, 210, 1, false),
    mode(320, 200, FourCC::BA81, 420, 1, false),
    mode(160, 100, FourCC::BA81, 480, 1, false),
    mode(1280, 800, FourCC::BA81, 480, 2, false),
    mode(1280, 800, FourCC::PBAA, 480, 1, false),
];

/// Sensor mode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorMode {
    /// Let the driver pick a mode for the resolution.
    #[default]
    Automatic,
    /// A specific vendor mode (0..=22).
    Fixed(u8),
}

impl SensorMode {
    /// Convert from the vendor numbering, where -1 means automatic.
    pub fn from_index(index: i32) -> Result<Self> {
        if index == -1 {
            return Ok(Self::Automatic);
        }
        u8::try_from(index)
            .ok()
            .filter(|idx| usize::from(*idx) < MODES.len())
            .map(Self::Fixed)
            .ok_or(CameraError::OutOfRange {
                property: "sensor-mode",
                value: i64::from(index),
            })
    }

    /// Vendor mode number, -1 for automatic.
    #[must_use]
    pub fn index(self) -> i32 {
        match self {
            Self::Automatic => -1,
            Self::Fixed(idx) => i32::from(idx),
        }
    }

    /// Mode description, `None` for automatic.
    #[must_use]
    pub fn info(self) -> Option<&'static ModeInfo> {
        match self {
            Self::Automatic => None,
            Self::Fixed(idx) => MODES.get(usize::from(idx)),
        }
    }

    /// Iterate over every fixed mode with its description.
    pub fn all() -> impl Iterator<Item = (Self, &'static ModeInfo)> {
        (0u8..).zip(MODES.iter()).map(|(idx, info)| (Self::Fixed(idx), info))
    }
}

/// Width the sensor produces for a given output height.
#[must_use]
pub const fn width_for_height(height: u32) -> Option<u32> {
    match height {
        100 => Some(160),
        200 => Some(320),
        400 => Some(640),
        720 | 800 => Some(1280),
        _ => None,
    }
}

/// A downstream request for a capture format. Unset fields keep their
/// current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapsRequest {
    /// Requested width; must agree with the height if both are given.
    pub width: Option<u32>,
    /// Requested height.
    pub height: Option<u32>,
    /// Requested sensor mode.
    pub mode: SensorMode,
    /// Requested output format; only `GREY` is accepted.
    pub fourcc: Option<FourCC>,
}

/// Validate a request against the sensor's capabilities.
///
/// Returns the format the source will produce.
pub fn negotiate(current: &Format, request: &CapsRequest) -> Result<Format> {
    let (width, height) = match request.height {
        Some(height) => {
            let width = width_for_height(height).ok_or_else(|| {
                CameraError::FormatNotSupported(Format::new(
                    request.width.unwrap_or_default(),
                    height,
                    FourCC::GREY,
                ))
            })?;
            if request.width.is_some_and(|w| w != width) {
                return Err(CameraError::FormatNotSupported(Format::new(
                    request.width.unwrap_or(width),
                    height,
                    FourCC::GREY,
                )));
            }
            (width, height)
        }
        None => (current.width, current.height),
    };

    let mode_fits = match request.mode {
        SensorMode::Automatic => true,
        SensorMode::Fixed(_) => request.mode.info().is_some_and(|info| info.height == height),
    };
    if !mode_fits {
        return Err(CameraError::InvalidMode {
            mode: request.mode.index(),
            width,
            height,
        });
    }

    if let Some(fourcc) = request.fourcc {
        if fourcc != FourCC::GREY {
            return Err(CameraError::FormatNotSupported(Format::new(
                width, height, fourcc,
            )));
        }
    }

    Ok(Format::new(width, height, FourCC::GREY))
}
