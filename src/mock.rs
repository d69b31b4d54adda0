//! Mock driver implementation for testing without hardware.
//!
//! The mock never produces frames on its own: whoever calls
//! [`MockDriver::emit`] plays the role of the driver's callback thread.

use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::mode::{width_for_height, SensorMode};
use crate::traits::{CameraError, ControlId, DeviceDriver, Format, FourCC, FrameCallback, Result};

#[derive(Debug)]
struct MockState {
    values: HashMap<ControlId, i64>,
    writes: Vec<(ControlId, i64)>,
    failing: HashSet<ControlId>,
    fail_registration: bool,
    fail_unregister: bool,
    unregister_delay: Duration,
    registered: bool,
    registrations: u32,
    mode: SensorMode,
    resolution: (u32, u32),
    closed: bool,
}

/// Mock driver for testing without hardware.
pub struct MockDriver {
    name: String,
    state: Mutex<MockState>,
    callback: Mutex<Option<FrameCallback>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDriver")
            .field("name", &self.name)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl MockDriver {
    /// Create a new mock driver with default settings.
    #[must_use]
    pub fn new() -> Self {
        let format = Format::default();
        Self {
            name: "mock".to_owned(),
            state: Mutex::new(MockState {
                values: HashMap::new(),
                writes: Vec::new(),
                failing: HashSet::new(),
                fail_registration: false,
                fail_unregister: false,
                unregister_delay: Duration::ZERO,
                registered: false,
                registrations: 0,
                mode: SensorMode::Automatic,
                resolution: (format.width, format.height),
                closed: false,
            }),
            callback: Mutex::new(None),
        }
    }

    /// Set the sensor name reported by this mock.
    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        name.clone_into(&mut self.name);
        self
    }

    /// Make every write to `id` fail.
    pub fn fail_control(&self, id: ControlId) {
        self.state.lock().failing.insert(id);
    }

    /// Make callback registration fail or succeed.
    pub fn fail_registration(&self, fail: bool) {
        self.state.lock().fail_registration = fail;
    }

    /// Make callback unregistration fail or succeed.
    pub fn fail_unregister(&self, fail: bool) {
        self.state.lock().fail_unregister = fail;
    }

    /// Make callback unregistration take at least `delay`, like a driver
    /// waiting out its next frame.
    pub fn slow_unregister(&self, delay: Duration) {
        self.state.lock().unregister_delay = delay;
    }

    /// Every control write so far, in order, including rejected ones.
    pub fn writes(&self) -> Vec<(ControlId, i64)> {
        self.state.lock().writes.clone()
    }

    /// Forget recorded writes.
    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Whether a frame callback is installed.
    pub fn is_registered(&self) -> bool {
        self.state.lock().registered
    }

    /// Number of successful registrations.
    pub fn registrations(&self) -> u32 {
        self.state.lock().registrations
    }

    /// Last sensor mode selected.
    pub fn mode(&self) -> SensorMode {
        self.state.lock().mode
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Format of the frames this mock would produce.
    pub fn format(&self) -> Format {
        let (width, height) = self.state.lock().resolution;
        Format::new(width, height, FourCC::GREY)
    }

    /// Invoke the installed callback with `bytes` on the calling thread.
    ///
    /// Blocks for as long as the callback does. Returns `false` when no
    /// callback is installed.
    pub fn emit(&self, bytes: &[u8]) -> bool {
        let mut callback = self.callback.lock();
        match callback.as_mut() {
            Some(callback) => {
                callback(bytes);
                true
            }
            None => false,
        }
    }

    /// Emit one frame of `pattern` at the current resolution.
    pub fn emit_pattern(&self, pattern: TestPattern) -> bool {
        let data = generate_test_frame(&self.format(), pattern);
        self.emit(&data)
    }
}

impl DeviceDriver for MockDriver {
    fn sensor_name(&self) -> String {
        self.name.clone()
    }

    fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }

    fn set_mode(&self, mode: SensorMode) -> Result<()> {
        self.state.lock().mode = mode;
        Ok(())
    }

    fn set_resolution(&self, width: u32, height: u32) -> Result<(u32, u32)> {
        if width_for_height(height) != Some(width) {
            return Err(CameraError::FormatNotSupported(Format::new(
                width,
                height,
                FourCC::GREY,
            )));
        }
        self.state.lock().resolution = (width, height);
        Ok((width, height))
    }

    fn set_control(&self, id: ControlId, value: i64) -> Result<()> {
        let mut state = self.state.lock();
        state.writes.push((id, value));
        if state.failing.contains(&id) {
            return Err(CameraError::ControlFailed {
                control: id,
                message: "rejected by mock".to_owned(),
            });
        }
        state.values.insert(id, value);
        Ok(())
    }

    fn get_control(&self, id: ControlId) -> Result<i64> {
        self.state
            .lock()
            .values
            .get(&id)
            .copied()
            .ok_or_else(|| CameraError::ControlFailed {
                control: id,
                message: "never written".to_owned(),
            })
    }

    fn register_frame_callback(&self, callback: FrameCallback) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.fail_registration {
                return Err(CameraError::RegistrationFailed(
                    "rejected by mock".to_owned(),
                ));
            }
            state.registered = true;
            state.registrations += 1;
        }
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn unregister_frame_callback(&self) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            state.registered = false;
            if state.fail_unregister {
                return Err(CameraError::StreamError("rejected by mock".to_owned()));
            }
            state.unregister_delay
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        // Waits for an in-flight callback to return.
        self.callback.lock().take();
        Ok(())
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid grey level.
    Solid(u8),
}

/// Generate test frame data based on pattern.
pub fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    match pattern {
        TestPattern::Gradient => generate_gradient(format.width, format.height),
        TestPattern::Solid(level) => vec![level; format.size as usize],
    }
}

/// Generate a GREY horizontal gradient.
fn generate_gradient(width: u32, height: u32) -> Vec<u8> {
    let row: Vec<u8> = (0..width)
        .map(|x| {
            #[allow(clippy::cast_possible_truncation)]
            let level = ((x * 255) / width.max(1)) as u8;
            level
        })
        .collect();
    row.repeat(height as usize)
}
