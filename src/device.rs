//! V4L2 driver implementation using the v4l crate.
//!
//! Frames are dequeued on a driver-owned streaming thread that invokes the
//! registered callback once per buffer. The buffer is requeued only after the
//! callback returns.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, warn};
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::device::Handle;
use v4l::io::mmap::Stream;
use v4l::io::traits::{CaptureStream as _, Stream as _};
use v4l::video::Capture;
use v4l::Device;

use crate::mode::SensorMode;
use crate::traits::{CameraError, ControlId, DeviceDriver, FourCC, FrameCallback, Result};

/// Number of mmap buffers queued while streaming.
const BUFFER_COUNT: u32 = 4;

/// Longest a wait for a frame may block before the streaming thread checks
/// whether it should exit. Bounds `unregister_frame_callback` when no frames
/// arrive, e.g. in external trigger mode.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// `poll(2)` readable event (Linux value).
const POLLIN: i16 = 0x0001;

/// Lets a worker thread report whether its stream came up.
struct Handshake(SyncSender<io::Result<()>>);

impl Handshake {
    fn report(self, result: io::Result<()>) {
        // The spawner is blocked in `recv` until this lands.
        let _ = self.0.send(result);
    }
}

#[derive(Debug)]
struct StreamWorker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl StreamWorker {
    /// Spawn a worker and wait until it reports its stream ready.
    ///
    /// A setup failure joins the thread and is returned as
    /// `RegistrationFailed`.
    fn spawn<F>(name: String, body: F) -> Result<Self>
    where
        F: FnOnce(Handshake, &AtomicBool) + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(0);
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || body(Handshake(tx), &flag))
            .map_err(|err| CameraError::RegistrationFailed(err.to_string()))?;

        match rx.recv() {
            Ok(Ok(())) => Ok(Self { running, handle }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(CameraError::RegistrationFailed(err.to_string()))
            }
            Err(_) => {
                let _ = handle.join();
                Err(CameraError::RegistrationFailed(
                    "capture thread exited during setup".to_owned(),
                ))
            }
        }
    }

    fn stop(self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        self.handle
            .join()
            .map_err(|_| CameraError::StreamError("capture thread panicked".to_owned()))
    }
}

/// V4L2 driver wrapping a capture device node.
pub struct V4L2Driver {
    index: u32,
    device: Device,
    card: String,
    worker: Mutex<Option<StreamWorker>>,
}

impl std::fmt::Debug for V4L2Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4L2Driver")
            .field("index", &self.index)
            .field("card", &self.card)
            .field("streaming", &self.worker.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl V4L2Driver {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        if !Path::new(&format!("/dev/video{index}")).exists() {
            return Err(CameraError::DeviceNotFound(index));
        }
        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE)
            || !caps.capabilities.contains(v4l::capability::Flags::STREAMING)
        {
            return Err(CameraError::DeviceOpenFailed(format!(
                "{} cannot stream video capture",
                caps.card
            )));
        }

        debug!(index, driver = %caps.driver, card = %caps.card, "device opened");
        Ok(Self {
            index,
            device,
            card: caps.card,
            worker: Mutex::new(None),
        })
    }

    fn control_error(id: ControlId, err: &std::io::Error) -> CameraError {
        CameraError::ControlFailed {
            control: id,
            message: err.to_string(),
        }
    }
}

impl DeviceDriver for V4L2Driver {
    fn sensor_name(&self) -> String {
        self.card.clone()
    }

    fn close(&self) -> Result<()> {
        self.unregister_frame_callback()
    }

    fn set_mode(&self, mode: SensorMode) -> Result<()> {
        // V4L2 has no vendor mode table; a mode pins its resolution.
        let Some(info) = mode.info() else {
            return Ok(());
        };
        self.set_resolution(info.width, info.height).map(|_| ())
    }

    fn set_resolution(&self, width: u32, height: u32) -> Result<(u32, u32)> {
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = FourCC::GREY.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        if FourCC::from(fmt.fourcc) != FourCC::GREY {
            warn!(fourcc = %FourCC::from(fmt.fourcc), "device did not accept GREY");
        }
        Ok((fmt.width, fmt.height))
    }

    fn set_control(&self, id: ControlId, value: i64) -> Result<()> {
        self.device
            .set_control(Control {
                id: id.0,
                value: Value::Integer(value),
            })
            .map_err(|err| Self::control_error(id, &err))
    }

    fn get_control(&self, id: ControlId) -> Result<i64> {
        let control = self
            .device
            .control(id.0)
            .map_err(|err| Self::control_error(id, &err))?;
        match control.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(on) => Ok(i64::from(on)),
            _ => Err(CameraError::ControlFailed {
                control: id,
                message: "not an integer control".to_owned(),
            }),
        }
    }

    fn register_frame_callback(&self, callback: FrameCallback) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(CameraError::RegistrationFailed(
                "callback already registered".to_owned(),
            ));
        }

        // The streaming thread owns its own handle on the node.
        let device = Device::new(self.index as usize)
            .map_err(|err| CameraError::RegistrationFailed(err.to_string()))?;
        let spawned = StreamWorker::spawn(
            format!("v4l2-capture-{}", self.index),
            move |handshake, running| stream_loop(&device, callback, handshake, running),
        )
        .inspect_err(|err| error!(%err, "could not create capture stream"))?;

        *worker = Some(spawned);
        Ok(())
    }

    fn unregister_frame_callback(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        worker.stop()
    }
}

impl Drop for V4L2Driver {
    fn drop(&mut self) {
        if let Err(err) = self.unregister_frame_callback() {
            warn!(%err, "failed to close the camera");
        }
    }
}

fn stream_loop(
    device: &Device,
    mut callback: FrameCallback,
    handshake: Handshake,
    running: &AtomicBool,
) {
    let mut stream = match open_stream(device) {
        Ok(stream) => stream,
        Err(err) => {
            handshake.report(Err(err));
            return;
        }
    };
    handshake.report(Ok(()));
    let handle = stream.handle();

    while running.load(Ordering::Acquire) {
        match wait_readable(&handle) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) if is_idle(&err) => continue,
            Err(err) => {
                error!(%err, "capture poll failed");
                break;
            }
        }
        match stream.next() {
            Ok((buf, meta)) => {
                let used = (meta.bytesused as usize).min(buf.len());
                callback(buf.get(..used).unwrap_or(buf));
            }
            Err(err) => {
                error!(%err, "capture stream failed");
                break;
            }
        }
    }
    debug!("capture thread exiting");
}

/// Allocate the buffers and start streaming with buffer 0 held back.
///
/// `Stream::next` requeues the buffer it returned last before dequeuing the
/// next one, and starts at index 0. Holding 0 back keeps every requeue on a
/// buffer this thread owns.
fn open_stream(device: &Device) -> io::Result<Stream<'_>> {
    let mut stream = Stream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)?;
    stream.set_timeout(DEQUEUE_TIMEOUT);
    for index in 1..BUFFER_COUNT as usize {
        stream.queue(index)?;
    }
    stream.start()?;
    Ok(stream)
}

/// Wait up to [`DEQUEUE_TIMEOUT`] for a filled buffer.
fn wait_readable(handle: &Handle) -> io::Result<bool> {
    let timeout_ms = i32::try_from(DEQUEUE_TIMEOUT.as_millis()).unwrap_or(i32::MAX);
    Ok(handle.poll(POLLIN, timeout_ms)? > 0)
}

/// Whether a wait error only means no frame arrived in time.
fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
