//! Pi-cam-source binary for testing frame capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use pi_cam_source::mock::{MockDriver, TestPattern};
use pi_cam_source::validation::validate_frame_size;
use pi_cam_source::{
    CameraError, CameraSource, CapsRequest, DeviceDriver, PullOutcome, SensorMode, Setting,
    V4L2Driver, VideoOrientation,
};

/// Video orientation choices.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OrientationArg {
    /// No rotation or flip
    Identity,
    /// Rotate 90 degrees clockwise
    Rotate90r,
    /// Rotate 180 degrees
    Rotate180,
    /// Rotate 90 degrees counter-clockwise
    Rotate90l,
    /// Flip horizontally
    Horizontal,
    /// Flip vertically
    Vertical,
    /// Flip across the upper-left/lower-right diagonal
    UlLr,
    /// Flip across the upper-right/lower-left diagonal
    UrLl,
}

impl From<OrientationArg> for VideoOrientation {
    fn from(arg: OrientationArg) -> Self {
        match arg {
            OrientationArg::Identity => Self::Identity,
            OrientationArg::Rotate90r => Self::Rotate90R,
            OrientationArg::Rotate180 => Self::Rotate180,
            OrientationArg::Rotate90l => Self::Rotate90L,
            OrientationArg::Horizontal => Self::Horizontal,
            OrientationArg::Vertical => Self::Vertical,
            OrientationArg::UlLr => Self::UpperLeftLowerRight,
            OrientationArg::UrLl => Self::UpperRightLowerLeft,
        }
    }
}

/// Command-line arguments.
///
/// Every option can also be given through the environment variable shown in
/// `--help`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Capture device index (0 for /dev/video0)
    #[arg(short, long, env = "CAMERA_DEVICE", default_value_t = 0)]
    device: u32,

    /// Output height in lines (100, 200, 400, 720 or 800); width follows
    #[arg(long, env = "CAMERA_HEIGHT")]
    height: Option<u32>,

    /// Vendor sensor mode, -1 for automatic
    #[arg(long, env = "SENSOR_MODE", default_value_t = -1, allow_hyphen_values = true)]
    sensor_mode: i32,

    /// Video orientation
    #[arg(long, env = "ORIENTATION", value_enum)]
    orientation: Option<OrientationArg>,

    /// Enable horizontal flip
    #[arg(long, env = "HFLIP")]
    hflip: bool,

    /// Enable vertical flip
    #[arg(long, env = "VFLIP")]
    vflip: bool,

    /// Manual exposure value (1-65535)
    #[arg(long, env = "EXPOSURE")]
    exposure: Option<u32>,

    /// Analogue gain (0-15)
    #[arg(long, env = "GAIN")]
    gain: Option<u32>,

    /// Enable automatic exposure
    #[arg(long, env = "AUTO_EXPOSURE")]
    auto_exposure: bool,

    /// Enable external trigger mode
    #[arg(long, env = "EXTERNAL_TRIGGER")]
    external_trigger: bool,

    /// Number of frames to capture, 0 to run until an error
    #[arg(short = 'n', long, env = "FRAMES", default_value_t = 10)]
    frames: u32,

    /// Per-frame capture timeout in milliseconds
    #[arg(long, env = "CAPTURE_TIMEOUT_MS", default_value_t = 1000)]
    timeout_ms: u64,

    /// Use the mock driver instead of a V4L2 device
    #[arg(long, env = "MOCK")]
    mock: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(true)
        .init();

    if let Err(err) = run(&args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> pi_cam_source::traits::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let (driver, producer) = if args.mock {
        let mock = Arc::new(MockDriver::new());
        let producer = spawn_mock_producer(Arc::clone(&mock), Arc::clone(&running));
        (mock as Arc<dyn DeviceDriver>, Some(producer))
    } else {
        let v4l2 = Arc::new(V4L2Driver::open(args.device)?);
        (v4l2 as Arc<dyn DeviceDriver>, None)
    };

    let source = CameraSource::new(Arc::clone(&driver));
    let format = source.configure(&CapsRequest {
        height: args.height,
        mode: SensorMode::from_index(args.sensor_mode)?,
        ..CapsRequest::default()
    })?;

    println!("Sensor: {}", source.sensor_name());
    println!("Format: {}x{} {}", format.width, format.height, format.fourcc);

    apply_args(&source, args)?;

    let timeout = Some(Duration::from_millis(args.timeout_ms));
    let mut captured = 0u32;
    while args.frames == 0 || captured < args.frames {
        match source.pull_frame(timeout) {
            Ok(PullOutcome::Frame(frame)) => {
                if let Err(err) = validate_frame_size(&frame, &format) {
                    warn!(%err, "unexpected frame size");
                }
                println!(
                    "Frame {}: {} bytes, timestamp: {:?}",
                    frame.metadata.sequence,
                    frame.data.len(),
                    frame.metadata.timestamp
                );
                captured += 1;
            }
            Ok(PullOutcome::Aborted) => break,
            Err(CameraError::Timeout) => warn!("capture timed out, retrying"),
            Err(err) => return Err(err),
        }
    }

    source.stop();
    running.store(false, Ordering::Release);
    if let Some(producer) = producer {
        if producer.join().is_err() {
            warn!("mock producer panicked");
        }
    }
    drop(source);
    if let Err(err) = driver.close() {
        warn!(%err, "failed to close the camera");
    }
    info!(captured, "done");
    Ok(())
}

fn apply_args(source: &CameraSource, args: &Args) -> pi_cam_source::traits::Result<()> {
    if let Some(orientation) = args.orientation {
        source.set_orientation(orientation.into());
    }
    if args.hflip {
        source.set_property(Setting::HFlip(true))?;
    }
    if args.vflip {
        source.set_property(Setting::VFlip(true))?;
    }
    if args.external_trigger {
        source.set_property(Setting::ExternalTrigger(true))?;
    }
    if args.auto_exposure {
        source.set_property(Setting::AutoExposure(true))?;
    }
    if let Some(exposure) = args.exposure {
        source.set_property(Setting::Exposure(exposure))?;
    }
    if let Some(gain) = args.gain {
        source.set_property(Setting::Gain(gain))?;
    }
    Ok(())
}

/// Play the driver's callback thread for the mock: emit a gradient frame at
/// roughly 30 fps until told to stop.
fn spawn_mock_producer(
    mock: Arc<MockDriver>,
    running: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while running.load(Ordering::Acquire) {
            mock.emit_pattern(TestPattern::Gradient);
            thread::sleep(Duration::from_millis(33));
        }
    })
}
