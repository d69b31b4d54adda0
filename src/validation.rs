//! Frame validation utilities for test pattern verification.
//!
//! This module provides functions to validate that captured GREY frames have
//! the expected size and contain expected test patterns. Useful for
//! integration testing with mock and virtual cameras.

use crate::traits::{CameraError, Format, Frame, Result};

/// Minimum left-to-right luminance change for a frame to count as a gradient.
const MIN_GRADIENT_CHANGE: u8 = 50;

/// Validates that a frame holds exactly one image of `format`.
///
/// # Errors
///
/// Returns `StreamError` if the payload length differs from `format.size`.
pub fn validate_frame_size(frame: &Frame, format: &Format) -> Result<()> {
    let expected = format.size as usize;
    if frame.data.len() == expected {
        Ok(())
    } else {
        Err(CameraError::StreamError(format!(
            "Frame {} has {} bytes, expected {expected} for {}x{}",
            frame.metadata.sequence,
            frame.data.len(),
            format.width,
            format.height
        )))
    }
}

/// Validates that a frame contains a horizontal gradient pattern.
///
/// Samples the centre row every 10 pixels and checks that the grey level
/// never drops by more than one step and rises by a significant amount
/// across the frame.
///
/// # Errors
///
/// Returns `StreamError` if:
/// - The centre row is outside the frame data
/// - The grey level decreases from left to right
/// - The total change is too small (solid frame)
pub fn validate_gradient(frame: &Frame, format: &Format) -> Result<()> {
    let row_start = (format.height / 2 * format.stride) as usize;
    let row = frame
        .data
        .get(row_start..row_start + format.width as usize)
        .ok_or_else(|| {
            CameraError::StreamError(format!(
                "Centre row at offset {row_start} outside {} byte frame",
                frame.data.len()
            ))
        })?;

    let samples: Vec<(usize, u8)> = row.iter().copied().enumerate().step_by(10).collect();
    for pair in samples.windows(2) {
        if let [(_, prev), (x, level)] = pair {
            if level.saturating_add(1) < *prev {
                return Err(CameraError::StreamError(format!(
                    "Gradient not monotonically increasing at x={x}: \
                     level {level} < previous {prev}"
                )));
            }
        }
    }

    let first = samples.first().map_or(0, |(_, level)| *level);
    let last = samples.last().map_or(0, |(_, level)| *level);
    let change = last.saturating_sub(first);
    if change < MIN_GRADIENT_CHANGE {
        return Err(CameraError::StreamError(format!(
            "Insufficient luminance change for gradient: {change} \
             (expected at least {MIN_GRADIENT_CHANGE})"
        )));
    }

    Ok(())
}

/// Validates that a sequence of frames has incrementing sequence numbers.
///
/// # Errors
///
/// Returns `StreamError` if:
/// - The frames slice is empty
/// - Any sequence number doesn't increment by exactly 1 from the previous
pub fn validate_frame_sequence(frames: &[Frame]) -> Result<()> {
    if frames.is_empty() {
        return Err(CameraError::StreamError(
            "Cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in frames.windows(2).enumerate() {
        if let [prev, curr] = pair {
            let expected = prev.metadata.sequence.wrapping_add(1);
            if curr.metadata.sequence != expected {
                return Err(CameraError::StreamError(format!(
                    "Frame sequence gap at index {}: expected {expected}, got {}",
                    i + 1,
                    curr.metadata.sequence
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{generate_test_frame, TestPattern};
    use crate::traits::{FourCC, FrameMetadata};
    use std::time::Duration;

    fn frame(sequence: u32, data: Vec<u8>) -> Frame {
        let bytes_used = u32::try_from(data.len()).expect("small test frame");
        Frame {
            data,
            metadata: FrameMetadata {
                sequence,
                timestamp: Duration::from_millis(u64::from(sequence) * 2),
                bytes_used,
            },
        }
    }

    #[test]
    fn test_validate_frame_size() {
        let format = Format::new(320, 200, FourCC::GREY);
        assert!(validate_frame_size(&frame(0, vec![0; 320 * 200]), &format).is_ok());
        assert!(validate_frame_size(&frame(0, vec![0; 128]), &format).is_err());
    }

    #[test]
    fn test_validate_gradient_success() {
        let format = Format::new(640, 400, FourCC::GREY);
        let data = generate_test_frame(&format, TestPattern::Gradient);
        let result = validate_gradient(&frame(0, data), &format);
        assert!(
            result.is_ok(),
            "Gradient validation should succeed: {result:?}"
        );
    }

    #[test]
    fn test_validate_gradient_wrong_pattern() {
        let format = Format::new(640, 400, FourCC::GREY);
        let data = generate_test_frame(&format, TestPattern::Solid(128));
        let result = validate_gradient(&frame(0, data), &format);
        assert!(
            result.is_err(),
            "Gradient validation should fail for solid pattern"
        );
    }

    #[test]
    fn test_validate_gradient_short_frame() {
        let format = Format::new(640, 400, FourCC::GREY);
        assert!(validate_gradient(&frame(0, vec![0; 16]), &format).is_err());
    }

    #[test]
    fn test_validate_frame_sequence_success() {
        let frames: Vec<Frame> = (0..5).map(|seq| frame(seq, vec![0])).collect();
        let result = validate_frame_sequence(&frames);
        assert!(
            result.is_ok(),
            "Frame sequence validation should succeed: {result:?}"
        );
    }

    #[test]
    fn test_validate_frame_sequence_empty() {
        let frames: Vec<Frame> = vec![];
        assert!(validate_frame_sequence(&frames).is_err());
    }

    #[test]
    fn test_validate_frame_sequence_with_gap() {
        let frames = vec![frame(0, vec![0]), frame(1, vec![0]), frame(3, vec![0])];
        let result = validate_frame_sequence(&frames);
        assert!(
            result.is_err(),
            "Frame sequence validation should fail with gap"
        );
    }
}
