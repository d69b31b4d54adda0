//! Configuration store for hardware-configurable settings.
//!
//! Setters record the latest requested value and mark the field dirty. The
//! capture cycle drains the dirty fields once per frame and writes them to the
//! device in [`APPLY_ORDER`].

use bitflags::bitflags;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::traits::{CameraError, ControlId, Result, EXPOSURE_AUTO, EXPOSURE_MANUAL};

/// A configurable field group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// External trigger mode.
    ExternalTrigger,
    /// Horizontal flip.
    HFlip,
    /// Vertical flip.
    VFlip,
    /// Image rotation.
    Rotation,
    /// Automatic exposure.
    AutoExposure,
    /// Manual exposure (shutter) value.
    Exposure,
    /// Analogue gain.
    Gain,
    /// White balance.
    WhiteBalance,
}

/// Order in which dirty fields are written to the hardware.
///
/// External trigger must precede the flip controls, and the exposure mode must
/// precede a manual exposure value or the firmware's auto-exposure loop
/// overwrites it on its next iteration.
pub const APPLY_ORDER: [Field; 8] = [
    Field::ExternalTrigger,
    Field::HFlip,
    Field::VFlip,
    Field::Rotation,
    Field::AutoExposure,
    Field::Exposure,
    Field::Gain,
    Field::WhiteBalance,
];

bitflags! {
    /// Fields changed since the last hardware apply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirtyMask: u16 {
        /// External trigger changed.
        const EXTERNAL_TRIGGER = 1 << 0;
        /// Horizontal flip changed.
        const HFLIP = 1 << 1;
        /// Vertical flip changed.
        const VFLIP = 1 << 2;
        /// Rotation changed.
        const ROTATION = 1 << 3;
        /// Auto-exposure changed.
        const AUTO_EXPOSURE = 1 << 4;
        /// Exposure changed.
        const EXPOSURE = 1 << 5;
        /// Gain changed.
        const GAIN = 1 << 6;
        /// White balance changed.
        const WHITE_BALANCE = 1 << 7;
    }
}

impl Default for DirtyMask {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Field> for DirtyMask {
    fn from(field: Field) -> Self {
        match field {
            Field::ExternalTrigger => Self::EXTERNAL_TRIGGER,
            Field::HFlip => Self::HFLIP,
            Field::VFlip => Self::VFLIP,
            Field::Rotation => Self::ROTATION,
            Field::AutoExposure => Self::AUTO_EXPOSURE,
            Field::Exposure => Self::EXPOSURE,
            Field::Gain => Self::GAIN,
            Field::WhiteBalance => Self::WHITE_BALANCE,
        }
    }
}

/// Image rotation in 90 degree steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    /// No rotation.
    #[default]
    Deg0,
    /// 90 degrees clockwise.
    Deg90,
    /// 180 degrees.
    Deg180,
    /// 270 degrees clockwise.
    Deg270,
}

impl Rotation {
    /// Rotation in degrees.
    #[must_use]
    pub const fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Parse a rotation given in degrees.
    pub fn from_degrees(degrees: u32) -> Result<Self> {
        match degrees {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            other => Err(CameraError::OutOfRange {
                property: "rotation",
                value: i64::from(other),
            }),
        }
    }
}

/// White balance setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhiteBalance {
    /// Automatic white balance.
    #[default]
    Auto,
    /// Fixed colour temperature in Kelvin.
    Temperature(u32),
}

/// Video orientation, applied as a combination of rotation and flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoOrientation {
    /// No rotation or flip.
    #[default]
    Identity,
    /// Rotate 90 degrees clockwise.
    Rotate90R,
    /// Rotate 180 degrees.
    Rotate180,
    /// Rotate 90 degrees counter-clockwise.
    Rotate90L,
    /// Flip horizontally.
    Horizontal,
    /// Flip vertically.
    Vertical,
    /// Flip across the upper-left/lower-right diagonal.
    UpperLeftLowerRight,
    /// Flip across the upper-right/lower-left diagonal.
    UpperRightLowerLeft,
    /// Set through individual rotation and flip properties.
    Custom,
}

impl VideoOrientation {
    /// `(rotation, hflip, vflip)` for this orientation, `None` for `Custom`.
    #[must_use]
    pub const fn components(self) -> Option<(Rotation, bool, bool)> {
        match self {
            Self::Identity => Some((Rotation::Deg0, false, false)),
            Self::Rotate90R => Some((Rotation::Deg90, false, false)),
            Self::Rotate180 => Some((Rotation::Deg180, false, false)),
            Self::Rotate90L => Some((Rotation::Deg270, false, false)),
            Self::Horizontal => Some((Rotation::Deg0, true, false)),
            Self::Vertical => Some((Rotation::Deg0, false, true)),
            Self::UpperLeftLowerRight => Some((Rotation::Deg90, false, true)),
            Self::UpperRightLowerLeft => Some((Rotation::Deg270, false, true)),
            Self::Custom => None,
        }
    }
}

/// A field together with its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    /// External trigger mode on/off.
    ExternalTrigger(bool),
    /// Horizontal flip on/off.
    HFlip(bool),
    /// Vertical flip on/off.
    VFlip(bool),
    /// Image rotation.
    Rotation(Rotation),
    /// Automatic exposure on/off.
    AutoExposure(bool),
    /// Manual exposure value (1..=65535).
    Exposure(u32),
    /// Analogue gain (0..=15).
    Gain(u32),
    /// White balance.
    WhiteBalance(WhiteBalance),
}

impl Setting {
    /// Field this setting belongs to.
    #[must_use]
    pub const fn field(&self) -> Field {
        match self {
            Self::ExternalTrigger(_) => Field::ExternalTrigger,
            Self::HFlip(_) => Field::HFlip,
            Self::VFlip(_) => Field::VFlip,
            Self::Rotation(_) => Field::Rotation,
            Self::AutoExposure(_) => Field::AutoExposure,
            Self::Exposure(_) => Field::Exposure,
            Self::Gain(_) => Field::Gain,
            Self::WhiteBalance(_) => Field::WhiteBalance,
        }
    }

    /// Check the value against the property's declared range.
    pub fn validate(&self) -> Result<()> {
        let (property, value, range) = match *self {
            Self::Exposure(v) => ("exposure", v, 1..=65_535),
            Self::Gain(v) => ("gain", v, 0..=15),
            Self::WhiteBalance(WhiteBalance::Temperature(k)) => ("white-balance", k, 2_800..=6_500),
            _ => return Ok(()),
        };
        if range.contains(&value) {
            Ok(())
        } else {
            Err(CameraError::OutOfRange {
                property,
                value: i64::from(value),
            })
        }
    }

    /// Control writes that apply this setting, in order.
    #[must_use]
    pub fn controls(&self) -> Vec<(ControlId, i64)> {
        match *self {
            Self::ExternalTrigger(on) => vec![(ControlId::EXTERNAL_TRIGGER, i64::from(on))],
            Self::HFlip(on) => vec![(ControlId::HFLIP, i64::from(on))],
            Self::VFlip(on) => vec![(ControlId::VFLIP, i64::from(on))],
            Self::Rotation(rotation) => vec![(ControlId::ROTATE, i64::from(rotation.degrees()))],
            Self::AutoExposure(on) => vec![(
                ControlId::EXPOSURE_AUTO,
                if on { EXPOSURE_AUTO } else { EXPOSURE_MANUAL },
            )],
            Self::Exposure(v) => vec![(ControlId::EXPOSURE, i64::from(v))],
            Self::Gain(v) => vec![(ControlId::GAIN, i64::from(v))],
            Self::WhiteBalance(WhiteBalance::Auto) => vec![(ControlId::AUTO_WHITE_BALANCE, 1)],
            Self::WhiteBalance(WhiteBalance::Temperature(k)) => vec![
                (ControlId::AUTO_WHITE_BALANCE, 0),
                (ControlId::WHITE_BALANCE_TEMPERATURE, i64::from(k)),
            ],
        }
    }
}

/// Snapshot of every configurable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// External trigger mode.
    pub external_trigger: bool,
    /// Horizontal flip.
    pub hflip: bool,
    /// Vertical flip.
    pub vflip: bool,
    /// Image rotation.
    pub rotation: Rotation,
    /// Automatic exposure.
    pub auto_exposure: bool,
    /// Manual exposure value.
    pub exposure: u32,
    /// Analogue gain.
    pub gain: u32,
    /// White balance.
    pub white_balance: WhiteBalance,
    /// Orientation last requested, `Custom` once a component is set directly.
    pub orientation: VideoOrientation,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            external_trigger: false,
            hflip: false,
            vflip: false,
            rotation: Rotation::Deg0,
            auto_exposure: false,
            exposure: 681,
            gain: 1,
            white_balance: WhiteBalance::Auto,
            orientation: VideoOrientation::Identity,
        }
    }
}

impl Settings {
    fn get(&self, field: Field) -> Setting {
        match field {
            Field::ExternalTrigger => Setting::ExternalTrigger(self.external_trigger),
            Field::HFlip => Setting::HFlip(self.hflip),
            Field::VFlip => Setting::VFlip(self.vflip),
            Field::Rotation => Setting::Rotation(self.rotation),
            Field::AutoExposure => Setting::AutoExposure(self.auto_exposure),
            Field::Exposure => Setting::Exposure(self.exposure),
            Field::Gain => Setting::Gain(self.gain),
            Field::WhiteBalance => Setting::WhiteBalance(self.white_balance),
        }
    }

    fn store(&mut self, setting: Setting) {
        match setting {
            Setting::ExternalTrigger(v) => self.external_trigger = v,
            Setting::HFlip(v) => self.hflip = v,
            Setting::VFlip(v) => self.vflip = v,
            Setting::Rotation(v) => self.rotation = v,
            Setting::AutoExposure(v) => self.auto_exposure = v,
            Setting::Exposure(v) => self.exposure = v,
            Setting::Gain(v) => self.gain = v,
            Setting::WhiteBalance(v) => self.white_balance = v,
        }
    }
}

/// Outcome of one [`ConfigStore::drain_and_apply`] call.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Settings written successfully, in apply order.
    pub applied: Vec<Setting>,
    /// Settings the device rejected, in apply order.
    pub failed: Vec<(Setting, CameraError)>,
}

impl ApplyReport {
    /// Whether nothing was dirty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct Inner {
    settings: Settings,
    dirty: DirtyMask,
}

/// Lock-protected settings record with a dirty mask.
#[derive(Debug, Default)]
pub struct ConfigStore {
    inner: Mutex<Inner>,
}

impl ConfigStore {
    /// Create a store holding the default settings, nothing dirty.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new value and mark its field dirty.
    pub fn set(&self, setting: Setting) {
        let mut inner = self.inner.lock();
        inner.settings.store(setting);
        if matches!(
            setting.field(),
            Field::HFlip | Field::VFlip | Field::Rotation
        ) {
            inner.settings.orientation = VideoOrientation::Custom;
        }
        inner.dirty |= DirtyMask::from(setting.field());
    }

    /// Last value written for `field`, applied to the device or not.
    pub fn get(&self, field: Field) -> Setting {
        self.inner.lock().settings.get(field)
    }

    /// Copy of every current value.
    pub fn snapshot(&self) -> Settings {
        self.inner.lock().settings.clone()
    }

    /// Fields waiting to be applied.
    pub fn dirty(&self) -> DirtyMask {
        self.inner.lock().dirty
    }

    /// Set rotation and flips from an orientation.
    ///
    /// `Custom` only records the orientation and leaves the components alone.
    pub fn set_orientation(&self, orientation: VideoOrientation) {
        let mut inner = self.inner.lock();
        if let Some((rotation, hflip, vflip)) = orientation.components() {
            inner.settings.rotation = rotation;
            inner.settings.hflip = hflip;
            inner.settings.vflip = vflip;
            inner.dirty |= DirtyMask::ROTATION | DirtyMask::HFLIP | DirtyMask::VFLIP;
        }
        inner.settings.orientation = orientation;
        debug!(?orientation, "orientation set");
    }

    /// Orientation last requested.
    pub fn orientation(&self) -> VideoOrientation {
        self.inner.lock().settings.orientation
    }

    /// Apply every dirty field in [`APPLY_ORDER`] and clear the mask.
    ///
    /// Each field is applied independently: a failure is logged and recorded
    /// in the report, and the remaining fields are still applied. Failed
    /// fields are not retried.
    pub fn drain_and_apply<F>(&self, mut apply: F) -> ApplyReport
    where
        F: FnMut(&Setting) -> Result<()>,
    {
        let mut inner = self.inner.lock();
        let mut report = ApplyReport::default();
        if inner.dirty.is_empty() {
            return report;
        }

        for field in APPLY_ORDER {
            if !inner.dirty.contains(DirtyMask::from(field)) {
                continue;
            }
            let setting = inner.settings.get(field);
            match apply(&setting) {
                Ok(()) => {
                    debug!(?setting, "applied");
                    report.applied.push(setting);
                }
                Err(err) => {
                    warn!(?field, %err, "could not apply setting");
                    report.failed.push((setting, err));
                }
            }
        }
        inner.dirty = DirtyMask::empty();
        report
    }
}
