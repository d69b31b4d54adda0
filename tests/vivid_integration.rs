//! Integration tests using vivid virtual camera.
//!
//! These tests require:
//! - The `integration` feature flag: `cargo test --features integration`
//! - The vivid kernel module loaded with a Gray Ramp pattern on its first
//!   device (`test_pattern=20`)
//! - Access to /dev/video* devices (may require sudo or video group membership)
//!
//! vivid rounds requested sizes to what its webcam input supports, so the
//! tests check the format the driver reports instead of the one requested.
//!
//! Tests will fail if vivid is not available or not configured correctly.

#![cfg(feature = "integration")]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pi_cam_source::validation::{validate_frame_sequence, validate_frame_size, validate_gradient};
use pi_cam_source::{
    CameraSource, CapsRequest, ControlId, DeviceDriver, Frame, PullOutcome, RunState, Setting,
    V4L2Driver,
};
use serial_test::serial;

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(2));

/// Find all available vivid virtual camera devices.
///
/// Uses sysfs to check device driver name before opening, avoiding
/// unnecessary device opens on real cameras.
fn find_vivid_devices() -> Vec<u32> {
    let video4linux = Path::new("/sys/class/video4linux");
    if !video4linux.exists() {
        return Vec::new();
    }

    let mut devices = Vec::new();
    for index in 0..10 {
        let name_path = video4linux.join(format!("video{index}")).join("name");
        let Ok(name) = fs::read_to_string(&name_path) else {
            continue;
        };

        if !name.to_lowercase().contains("vivid") {
            continue;
        }

        if V4L2Driver::open(index).is_ok() {
            devices.push(index);
        }
    }
    devices
}

/// Fail the test if vivid is not available.
///
/// Integration tests MUST have vivid loaded - they should fail, not silently skip.
macro_rules! require_vivid {
    () => {
        match find_vivid_devices().first().copied() {
            Some(idx) => idx,
            None => {
                panic!(
                    "vivid virtual camera not available.\n\
                     Load vivid with: sudo modprobe vivid test_pattern=20\n\
                     Or run unit tests only: cargo test --lib"
                );
            }
        }
    };
}

fn open_source(index: u32) -> (Arc<V4L2Driver>, CameraSource) {
    let driver = Arc::new(V4L2Driver::open(index).expect("Failed to open vivid device"));
    let source = CameraSource::new(Arc::clone(&driver) as Arc<dyn DeviceDriver>);
    (driver, source)
}

fn pull(source: &CameraSource) -> Frame {
    match source.pull_frame(TIMEOUT).expect("Failed to capture frame") {
        PullOutcome::Frame(frame) => frame,
        PullOutcome::Aborted => panic!("pull aborted unexpectedly"),
    }
}

#[test]
#[serial]
fn test_vivid_driver_open() {
    let device_index = require_vivid!();

    let driver = V4L2Driver::open(device_index).expect("Failed to open vivid device");
    let name = driver.sensor_name();
    println!("Opened vivid device: {name}");
    assert!(!name.is_empty(), "card name should be reported");
}

#[test]
#[serial]
fn test_vivid_set_resolution() {
    let device_index = require_vivid!();

    let driver = V4L2Driver::open(device_index).expect("Failed to open vivid device");
    let (width, height) = driver
        .set_resolution(640, 400)
        .expect("Failed to set resolution");

    println!("Requested: 640x400, actual: {width}x{height}");
    assert!(width > 0, "Width should be positive");
    assert!(height > 0, "Height should be positive");
}

#[test]
#[serial]
fn test_vivid_capture_single_frame() {
    let device_index = require_vivid!();
    let (_driver, source) = open_source(device_index);

    let format = source
        .configure(&CapsRequest {
            height: Some(400),
            ..CapsRequest::default()
        })
        .expect("Failed to configure");

    let frame = pull(&source);
    println!("Captured frame:");
    println!("  Sequence: {}", frame.metadata.sequence);
    println!("  Timestamp: {:?}", frame.metadata.timestamp);
    println!("  Bytes used: {}", frame.metadata.bytes_used);

    assert_eq!(source.run_state(), RunState::Started);
    assert_eq!(frame.metadata.sequence, 0);
    let result = validate_frame_size(&frame, &format);
    assert!(result.is_ok(), "Frame size mismatch: {:?}", result.err());

    source.stop();
    assert_eq!(source.run_state(), RunState::Stopped);
}

#[test]
#[serial]
fn test_vivid_capture_multiple_frames() {
    let device_index = require_vivid!();
    let (_driver, source) = open_source(device_index);
    source
        .configure(&CapsRequest::default())
        .expect("Failed to configure");

    let frames: Vec<Frame> = (0..10).map(|_| pull(&source)).collect();
    for frame in &frames {
        println!(
            "Frame seq={}, ts={:?}",
            frame.metadata.sequence, frame.metadata.timestamp
        );
    }

    let result = validate_frame_sequence(&frames);
    assert!(
        result.is_ok(),
        "Frame sequence validation failed: {:?}",
        result.err()
    );
}

#[test]
#[serial]
fn test_vivid_gradient_pattern() {
    let device_index = require_vivid!();
    let (_driver, source) = open_source(device_index);
    let format = source
        .configure(&CapsRequest {
            height: Some(400),
            ..CapsRequest::default()
        })
        .expect("Failed to configure");

    let frame = pull(&source);
    let result = validate_gradient(&frame, &format);
    assert!(
        result.is_ok(),
        "Gradient validation failed on first vivid device.\n\
         Expected Gray Ramp pattern (test_pattern=20).\n\
         Error: {:?}",
        result.err()
    );
}

#[test]
#[serial]
fn test_vivid_flip_reaches_device() {
    let device_index = require_vivid!();
    let (_driver, source) = open_source(device_index);
    source
        .configure(&CapsRequest::default())
        .expect("Failed to configure");

    source
        .set_property(Setting::HFlip(true))
        .expect("hflip is valid");
    pull(&source);

    let value = source
        .read_control(ControlId::HFLIP)
        .expect("vivid exposes horizontal flip");
    assert_eq!(value, 1, "flip should be applied before the frame");
}

#[test]
#[serial]
fn test_vivid_stop_and_restart() {
    let device_index = require_vivid!();
    let (driver, source) = open_source(device_index);
    source
        .configure(&CapsRequest::default())
        .expect("Failed to configure");

    pull(&source);
    source.stop();
    assert!(matches!(
        source.pull_frame(TIMEOUT),
        Ok(PullOutcome::Aborted)
    ));

    source.start().expect("Failed to restart");
    let frame = pull(&source);
    assert_eq!(frame.metadata.sequence, 0, "restart resets the sequence");

    source.stop();
    driver.close().expect("Failed to close");
}
