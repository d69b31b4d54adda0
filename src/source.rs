//! Capture cycle coordinator.
//!
//! [`CameraSource`] turns the driver's push-style frame callback into a
//! pull-style `pull_frame` call. Each pull applies pending configuration,
//! arms the handoff channel and waits for the driver to deliver one frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::{ConfigStore, Field, Setting, Settings, VideoOrientation};
use crate::handoff::{ArmOutcome, DeliverOutcome, FrameChannel};
use crate::mode::{negotiate, CapsRequest, SensorMode};
use crate::traits::{
    CameraError, ControlId, DeviceDriver, Format, Frame, FrameCallback, FrameMetadata, Result,
};

/// Streaming state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not streaming yet; the first pull starts it.
    Ready,
    /// Frame callback registered.
    Started,
    /// Stopped explicitly; pulls abort until [`CameraSource::start`].
    Stopped,
    /// Callback registration failed; pulls fail until [`CameraSource::start`].
    Failed,
}

/// Result of one capture cycle.
#[derive(Debug)]
pub enum PullOutcome {
    /// A frame was captured.
    Frame(Frame),
    /// The source was stopped before a frame arrived.
    Aborted,
}

#[derive(Debug)]
struct Session {
    state: RunState,
    channel: Arc<FrameChannel>,
    started_at: Instant,
    sequence: u32,
}

/// Pull-based frame source over a callback-driven [`DeviceDriver`].
///
/// Shared between the pulling thread and whoever stops the source or changes
/// properties; every method takes `&self`. Pulls must not overlap.
pub struct CameraSource {
    driver: Arc<dyn DeviceDriver>,
    config: ConfigStore,
    format: Mutex<Format>,
    mode: Mutex<SensorMode>,
    session: Mutex<Session>,
}

impl std::fmt::Debug for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSource")
            .field("config", &self.config)
            .field("format", &*self.format.lock())
            .field("mode", &*self.mode.lock())
            .field("session", &*self.session.lock())
            .finish_non_exhaustive()
    }
}

impl CameraSource {
    /// Create a source on top of an opened driver, with default settings.
    pub fn new(driver: Arc<dyn DeviceDriver>) -> Self {
        Self {
            driver,
            config: ConfigStore::new(),
            format: Mutex::new(Format::default()),
            mode: Mutex::new(SensorMode::Automatic),
            session: Mutex::new(Session {
                state: RunState::Ready,
                channel: Arc::new(FrameChannel::new()),
                started_at: Instant::now(),
                sequence: 0,
            }),
        }
    }

    /// Negotiate the capture format and program it into the driver.
    ///
    /// A rejected sensor mode is only logged; a rejected resolution fails.
    pub fn configure(&self, request: &CapsRequest) -> Result<Format> {
        if self.session.lock().state == RunState::Started {
            return Err(CameraError::StreamError(
                "cannot renegotiate while streaming".to_owned(),
            ));
        }

        let current = self.format.lock().clone();
        let wanted = negotiate(&current, request)?;

        if request.mode != SensorMode::Automatic {
            if let Err(err) = self.driver.set_mode(request.mode) {
                warn!(mode = request.mode.index(), %err, "could not set sensor mode");
            }
            *self.mode.lock() = request.mode;
        }

        let (width, height) = self
            .driver
            .set_resolution(wanted.width, wanted.height)
            .inspect_err(|err| error!(%err, "could not set resolution"))?;
        let format = Format::new(width, height, wanted.fourcc);
        debug!(width, height, "format negotiated");
        *self.format.lock() = format.clone();
        Ok(format)
    }

    /// Register with the driver and start streaming.
    ///
    /// Does nothing when already started. Every start opens a fresh handoff
    /// channel and restarts the frame sequence.
    pub fn start(&self) -> Result<()> {
        let mut session = self.session.lock();
        if session.state == RunState::Started {
            return Ok(());
        }
        self.start_locked(&mut session)
    }

    fn start_locked(&self, session: &mut Session) -> Result<()> {
        let channel = Arc::new(FrameChannel::new());
        let producer = Arc::clone(&channel);
        let callback: FrameCallback = Box::new(move |bytes| {
            if producer.producer_deliver(bytes) == DeliverOutcome::Dropped {
                trace!(len = bytes.len(), "frame dropped, no pull waiting");
            }
        });

        if let Err(err) = self.driver.register_frame_callback(callback) {
            error!(%err, "failed to start streaming");
            session.state = RunState::Failed;
            return Err(match err {
                err @ CameraError::RegistrationFailed(_) => err,
                other => CameraError::RegistrationFailed(other.to_string()),
            });
        }

        session.channel = channel;
        session.state = RunState::Started;
        session.started_at = Instant::now();
        session.sequence = 0;
        info!(sensor = %self.driver.sensor_name(), "streaming started");
        Ok(())
    }

    /// Run one capture cycle.
    ///
    /// Starts streaming on the first call, applies pending configuration and
    /// waits up to `timeout` (`None` waits indefinitely) for the next frame.
    /// Returns [`PullOutcome::Aborted`] when the source is stopped before or
    /// during the wait, and [`CameraError::Timeout`] when no frame arrived in
    /// time; a timeout leaves the source streaming.
    pub fn pull_frame(&self, timeout: Option<Duration>) -> Result<PullOutcome> {
        let channel = {
            let mut session = self.session.lock();
            match session.state {
                RunState::Ready => self.start_locked(&mut session)?,
                RunState::Started => {}
                RunState::Stopped => return Ok(PullOutcome::Aborted),
                RunState::Failed => return Err(CameraError::NotStarted),
            }
            Arc::clone(&session.channel)
        };

        let report = self
            .config
            .drain_and_apply(|setting| apply_setting(self.driver.as_ref(), setting));
        if !report.is_empty() {
            debug!(
                applied = report.applied.len(),
                failed = report.failed.len(),
                "configuration applied"
            );
        }

        match channel.consumer_arm(timeout) {
            ArmOutcome::Filled(data) => Ok(PullOutcome::Frame(self.finish_frame(&channel, data))),
            ArmOutcome::Stopped => {
                debug!("pull aborted by stop");
                Ok(PullOutcome::Aborted)
            }
            ArmOutcome::TimedOut => {
                warn!(?timeout, "no frame within timeout");
                Err(CameraError::Timeout)
            }
        }
    }

    fn finish_frame(&self, channel: &Arc<FrameChannel>, data: Vec<u8>) -> Frame {
        let mut session = self.session.lock();
        let (sequence, timestamp) = if Arc::ptr_eq(&session.channel, channel) {
            let sequence = session.sequence;
            session.sequence = session.sequence.wrapping_add(1);
            (sequence, session.started_at.elapsed())
        } else {
            // Restarted while this frame was in flight.
            (0, Duration::ZERO)
        };
        drop(session);

        let bytes_used = u32::try_from(data.len()).unwrap_or(u32::MAX);
        Frame {
            data,
            metadata: FrameMetadata {
                sequence,
                timestamp,
                bytes_used,
            },
        }
    }

    /// Stop streaming.
    ///
    /// Wakes a blocked pull, which then returns [`PullOutcome::Aborted`], and
    /// releases a driver callback waiting on the channel. Unregistration
    /// failures are logged only.
    ///
    /// The state change is visible before the driver is unregistered; the
    /// driver call runs without holding the session lock.
    pub fn stop(&self) {
        let (was_started, frames) = {
            let mut session = self.session.lock();
            let was_started = session.state == RunState::Started;
            session.state = RunState::Stopped;
            session.channel.stop();
            (was_started, session.sequence)
        };

        if was_started {
            if let Err(err) = self.driver.unregister_frame_callback() {
                warn!(%err, "could not stop streaming");
            }
            info!(frames, "streaming stopped");
        }
    }

    /// Current streaming state.
    pub fn run_state(&self) -> RunState {
        self.session.lock().state
    }

    /// Whether the frame callback is registered.
    pub fn is_started(&self) -> bool {
        self.run_state() == RunState::Started
    }

    /// Validate and record a property change. It reaches the hardware at
    /// the start of the next capture cycle.
    pub fn set_property(&self, setting: Setting) -> Result<()> {
        setting.validate()?;
        self.config.set(setting);
        Ok(())
    }

    /// Last requested value of a property.
    pub fn property(&self, field: Field) -> Setting {
        self.config.get(field)
    }

    /// Copy of every property value.
    pub fn settings(&self) -> Settings {
        self.config.snapshot()
    }

    /// Set rotation and flips from a video orientation.
    pub fn set_orientation(&self, orientation: VideoOrientation) {
        self.config.set_orientation(orientation);
    }

    /// Video orientation last requested.
    pub fn orientation(&self) -> VideoOrientation {
        self.config.orientation()
    }

    /// Configuration store backing the properties.
    pub const fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Read a control back from the hardware.
    pub fn read_control(&self, id: ControlId) -> Result<i64> {
        self.driver.get_control(id)
    }

    /// Name reported by the sensor.
    pub fn sensor_name(&self) -> String {
        self.driver.sensor_name()
    }

    /// Negotiated capture format.
    pub fn format(&self) -> Format {
        self.format.lock().clone()
    }

    /// Sensor mode last requested.
    pub fn sensor_mode(&self) -> SensorMode {
        *self.mode.lock()
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if self.is_started() {
            self.stop();
        }
    }
}

fn apply_setting(driver: &dyn DeviceDriver, setting: &Setting) -> Result<()> {
    for (id, value) in setting.controls() {
        driver.set_control(id, value)?;
    }
    Ok(())
}
