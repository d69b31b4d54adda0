//! End-to-end capture cycle tests against the mock driver.
//!
//! A background thread plays the driver's callback thread by emitting frames
//! through [`MockDriver::emit`]. These tests run without hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pi_cam_source::mock::{generate_test_frame, MockDriver, TestPattern};
use pi_cam_source::validation::{validate_frame_sequence, validate_frame_size, validate_gradient};
use pi_cam_source::{
    CameraError, CameraSource, CapsRequest, ControlId, DeviceDriver, Field, Frame, PullOutcome,
    RunState, Setting, VideoOrientation,
};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(2));

/// Emits the same payload until dropped.
///
/// Must outlive the source it feeds: a delivered frame blocks the emitting
/// thread until the source re-arms or stops.
struct Producer {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Producer {
    fn spawn(driver: &Arc<MockDriver>, payload: Vec<u8>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let driver = Arc::clone(driver);
        let handle = thread::spawn(move || {
            while flag.load(Ordering::Acquire) {
                driver.emit(&payload);
                thread::sleep(Duration::from_millis(1));
            }
        });
        Self {
            running,
            handle: Some(handle),
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        // A failed assertion may leave the thread parked in a delivery.
        if thread::panicking() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            handle.join().expect("producer thread panicked");
        }
    }
}

fn setup() -> (Arc<MockDriver>, CameraSource) {
    let driver = Arc::new(MockDriver::new());
    let source = CameraSource::new(Arc::clone(&driver) as Arc<dyn DeviceDriver>);
    (driver, source)
}

fn pull(source: &CameraSource) -> Frame {
    match source.pull_frame(TIMEOUT).expect("pull should succeed") {
        PullOutcome::Frame(frame) => frame,
        PullOutcome::Aborted => panic!("pull aborted unexpectedly"),
    }
}

#[test]
fn test_pull_receives_exact_payload() {
    let (driver, source) = setup();
    let _producer = Producer::spawn(&driver, vec![0xAB; 128]);

    let frame = pull(&source);
    assert_eq!(frame.data, vec![0xAB; 128]);
    assert_eq!(frame.metadata.bytes_used, 128);
    assert_eq!(frame.metadata.sequence, 0);
    assert_eq!(source.run_state(), RunState::Started);
    assert_eq!(driver.registrations(), 1);

    source.stop();
}

#[test]
fn test_stop_wakes_blocked_pull() {
    let (driver, source) = setup();
    let source = Arc::new(source);
    source.start().expect("start succeeds");

    let puller = {
        let source = Arc::clone(&source);
        thread::spawn(move || source.pull_frame(None))
    };
    thread::sleep(Duration::from_millis(50));

    let stopped_at = Instant::now();
    source.stop();
    let outcome = puller.join().expect("puller thread panicked");

    assert!(matches!(outcome, Ok(PullOutcome::Aborted)));
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert!(!driver.is_registered());
}

#[test]
fn test_settings_applied_in_priority_order() {
    let (driver, source) = setup();
    let _producer = Producer::spawn(&driver, vec![0; 16]);

    // Deliberately out of hardware order.
    source
        .set_property(Setting::Exposure(1200))
        .expect("exposure in range");
    source
        .set_property(Setting::AutoExposure(false))
        .expect("always valid");
    source.set_property(Setting::HFlip(true)).expect("always valid");
    source
        .set_property(Setting::ExternalTrigger(true))
        .expect("always valid");

    pull(&source);
    assert_eq!(
        driver.writes(),
        vec![
            (ControlId::EXTERNAL_TRIGGER, 1),
            (ControlId::HFLIP, 1),
            (ControlId::EXPOSURE_AUTO, 1),
            (ControlId::EXPOSURE, 1200),
        ]
    );
    assert!(source.config().dirty().is_empty());

    driver.clear_writes();
    pull(&source);
    assert!(driver.writes().is_empty(), "clean fields are not rewritten");

    source.stop();
}

#[test]
fn test_failed_setting_does_not_block_capture() {
    let (driver, source) = setup();
    let _producer = Producer::spawn(&driver, vec![7; 32]);
    driver.fail_control(ControlId::GAIN);

    source.set_property(Setting::Gain(3)).expect("gain in range");
    source.set_property(Setting::HFlip(true)).expect("always valid");

    let frame = pull(&source);
    assert_eq!(frame.data.len(), 32);
    assert_eq!(
        driver.writes(),
        vec![(ControlId::HFLIP, 1), (ControlId::GAIN, 3)]
    );
    assert!(source.config().dirty().is_empty());
    assert_eq!(source.property(Field::Gain), Setting::Gain(3));
    assert_eq!(source.read_control(ControlId::HFLIP).expect("written"), 1);

    driver.clear_writes();
    pull(&source);
    assert!(driver.writes().is_empty(), "failed writes are not retried");

    source.stop();
}

#[test]
fn test_timeout_then_late_frame_is_dropped() {
    let (driver, source) = setup();
    source.start().expect("start succeeds");

    let begun = Instant::now();
    let result = source.pull_frame(Some(Duration::from_millis(100)));
    assert!(matches!(result, Err(CameraError::Timeout)));
    assert!(begun.elapsed() >= Duration::from_millis(100));
    assert_eq!(source.run_state(), RunState::Started);

    // Nobody is armed: the callback returns at once.
    assert!(driver.emit(&[1; 16]));

    let _producer = Producer::spawn(&driver, vec![2; 16]);
    let frame = pull(&source);
    assert_eq!(frame.data, vec![2; 16]);
    assert_eq!(frame.metadata.sequence, 0);

    source.stop();
}

#[test]
fn test_registration_failure_marks_source_failed() {
    let (driver, source) = setup();
    driver.fail_registration(true);

    assert!(matches!(
        source.pull_frame(TIMEOUT),
        Err(CameraError::RegistrationFailed(_))
    ));
    assert_eq!(source.run_state(), RunState::Failed);
    assert!(matches!(
        source.pull_frame(TIMEOUT),
        Err(CameraError::NotStarted)
    ));
    assert_eq!(driver.registrations(), 0);

    driver.fail_registration(false);
    source.start().expect("explicit start recovers");
    assert_eq!(source.run_state(), RunState::Started);
    source.stop();
}

#[test]
fn test_restart_after_stop() {
    let (driver, source) = setup();
    let _producer = Producer::spawn(&driver, vec![9; 64]);

    pull(&source);
    pull(&source);
    source.stop();
    assert!(matches!(
        source.pull_frame(TIMEOUT),
        Ok(PullOutcome::Aborted)
    ));
    assert_eq!(source.run_state(), RunState::Stopped);

    source.start().expect("restart succeeds");
    let frame = pull(&source);
    assert_eq!(frame.metadata.sequence, 0, "restart resets the sequence");
    assert_eq!(driver.registrations(), 2);

    source.stop();
}

#[test]
fn test_unregister_failure_still_stops() {
    let (driver, source) = setup();
    driver.fail_unregister(true);

    source.start().expect("start succeeds");
    source.stop();
    assert_eq!(source.run_state(), RunState::Stopped);
    assert!(matches!(
        source.pull_frame(TIMEOUT),
        Ok(PullOutcome::Aborted)
    ));
}

#[test]
fn test_state_readable_while_driver_unregisters() {
    let (driver, source) = setup();
    let source = Arc::new(source);
    driver.slow_unregister(Duration::from_millis(500));
    source.start().expect("start succeeds");

    let stopper = {
        let source = Arc::clone(&source);
        thread::spawn(move || source.stop())
    };
    while driver.is_registered() {
        thread::sleep(Duration::from_millis(1));
    }

    let asked_at = Instant::now();
    assert_eq!(source.run_state(), RunState::Stopped);
    assert!(matches!(
        source.pull_frame(TIMEOUT),
        Ok(PullOutcome::Aborted)
    ));
    assert!(asked_at.elapsed() < Duration::from_millis(250));

    stopper.join().expect("stopper thread panicked");
}

#[test]
fn test_orientation_reaches_driver() {
    let (driver, source) = setup();
    let _producer = Producer::spawn(&driver, vec![0; 8]);

    source.set_orientation(VideoOrientation::Rotate180);
    pull(&source);
    assert_eq!(
        driver.writes(),
        vec![
            (ControlId::HFLIP, 0),
            (ControlId::VFLIP, 0),
            (ControlId::ROTATE, 180),
        ]
    );
    assert_eq!(source.orientation(), VideoOrientation::Rotate180);

    source.stop();
}

#[test]
fn test_gradient_sequence_at_negotiated_format() {
    let (driver, source) = setup();
    let format = source
        .configure(&CapsRequest {
            height: Some(200),
            ..CapsRequest::default()
        })
        .expect("200 lines is valid");
    assert_eq!((format.width, format.height), (320, 200));

    let _producer = Producer::spawn(&driver, generate_test_frame(&format, TestPattern::Gradient));
    let frames: Vec<Frame> = (0..5).map(|_| pull(&source)).collect();

    for frame in &frames {
        validate_frame_size(frame, &format).expect("one full frame");
        validate_gradient(frame, &format).expect("gradient pattern");
    }
    validate_frame_sequence(&frames).expect("consecutive sequence numbers");
    assert!(frames
        .windows(2)
        .all(|pair| pair[0].metadata.timestamp <= pair[1].metadata.timestamp));

    source.stop();
}

#[test]
fn test_property_changes_between_pulls() {
    let (driver, source) = setup();
    let source = Arc::new(source);
    let _producer = Producer::spawn(&driver, vec![0; 8]);

    let setter = {
        let source = Arc::clone(&source);
        thread::spawn(move || {
            for gain in 0..=15 {
                source.set_property(Setting::Gain(gain)).expect("gain in range");
                thread::sleep(Duration::from_millis(2));
            }
        })
    };
    for _ in 0..10 {
        pull(&source);
    }
    setter.join().expect("setter thread panicked");
    pull(&source);

    let gains: Vec<i64> = driver
        .writes()
        .into_iter()
        .filter(|(id, _)| *id == ControlId::GAIN)
        .map(|(_, value)| value)
        .collect();
    assert_eq!(gains.last(), Some(&15), "latest value wins");
    assert!(gains.windows(2).all(|pair| pair[0] < pair[1]));

    source.stop();
}
