//! Synthetic raw sensor data
//!
//! Produces deterministic raw buffers in every supported [`PixelFormat`] so
//! the simulated vendor layer, the tests and the benchmarks can exercise the
//! conversion path without hardware.

use crate::types::PixelFormat;

/// Create a raw frame whose content changes with `frame_number`.
///
/// The pattern is a diagonal gradient offset by the frame number, so two
/// consecutive frames never compare equal.
pub fn synthetic_raw_frame(
    frame_number: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Vec<u8> {
    let bpp = format.bytes_per_pixel();
    let mut data = vec![0u8; format.buffer_size(width, height)];
    let base = (frame_number % 256) as u8;

    for y in 0..height {
        for x in 0..width {
            let idx = (y as usize * width as usize + x as usize) * bpp;
            let level = base.wrapping_add(((x + y) % 256) as u8);
            match format {
                PixelFormat::Mono16 => {
                    let sample = u16::from(level) << 8;
                    data[idx..idx + 2].copy_from_slice(&sample.to_le_bytes());
                }
                PixelFormat::Rgb8 | PixelFormat::Bgr8 => {
                    data[idx] = level;
                    data[idx + 1] = base.wrapping_add((x % 256) as u8);
                    data[idx + 2] = base.wrapping_add((y % 256) as u8);
                }
                _ => data[idx] = level,
            }
        }
    }

    data
}

/// Create a raw frame where every byte holds the same value.
///
/// Handy for tear detection: a consistent frame has exactly one distinct byte.
pub fn uniform_raw_frame(value: u8, width: u32, height: u32, format: PixelFormat) -> Vec<u8> {
    vec![value; format.buffer_size(width, height)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_raw_frame_correct_size() {
        let frame = synthetic_raw_frame(0, 64, 48, PixelFormat::BayerRg8);
        assert_eq!(frame.len(), 64 * 48);

        let frame = synthetic_raw_frame(0, 64, 48, PixelFormat::Rgb8);
        assert_eq!(frame.len(), 64 * 48 * 3);

        let frame = synthetic_raw_frame(0, 64, 48, PixelFormat::Mono16);
        assert_eq!(frame.len(), 64 * 48 * 2);
    }

    #[test]
    fn test_synthetic_raw_frames_differ() {
        let frame0 = synthetic_raw_frame(0, 32, 24, PixelFormat::Mono8);
        let frame1 = synthetic_raw_frame(1, 32, 24, PixelFormat::Mono8);
        assert_ne!(frame0, frame1);
    }

    #[test]
    fn test_uniform_raw_frame() {
        let frame = uniform_raw_frame(7, 4, 4, PixelFormat::Bgr8);
        assert_eq!(frame.len(), 48);
        assert!(frame.iter().all(|&b| b == 7));
    }
}
