//! Frame hand-off between the acquisition callback and consumers.
//!
//! The vendor invokes the registered callback on its own thread. Each raw
//! image is converted into a brand-new BGR8 [`Frame`] and published by
//! swapping an `Arc` under a short lock, so a published frame is never
//! mutated and a reader can never observe one half written.

use crate::platform::RawImage;
use crate::types::PixelFormat;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A BGR8 image ready for display or storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed BGR triplets, row major.
    pub data: Vec<u8>,
    /// Assigned at publish time, starting at 1. The placeholder frame has 0.
    pub sequence: u64,
    /// Frame counter reported by the device.
    pub frame_number: u64,
    pub received_at: DateTime<Utc>,
}

impl Frame {
    /// All-black frame shown before the first acquisition completes.
    pub fn black(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; PixelFormat::Bgr8.buffer_size(width, height)],
            sequence: 0,
            frame_number: 0,
            received_at: Utc::now(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.sequence == 0
    }

    /// BGR value at (`x`, `y`), or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.data.get(idx..idx + 3).map(|p| [p[0], p[1], p[2]])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("raw buffer too short: expected {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },
    #[error("empty image {width}x{height}")]
    EmptyImage { width: u32, height: u32 },
}

/// Convert a raw sensor buffer into tightly packed BGR8.
pub fn convert_to_bgr(raw: &RawImage<'_>) -> Result<Vec<u8>, ConversionError> {
    let (width, height) = (raw.width as usize, raw.height as usize);
    if width == 0 || height == 0 {
        return Err(ConversionError::EmptyImage {
            width: raw.width,
            height: raw.height,
        });
    }

    let expected = raw.pixel_format.buffer_size(raw.width, raw.height);
    if raw.data.len() < expected {
        return Err(ConversionError::ShortBuffer {
            expected,
            actual: raw.data.len(),
        });
    }
    let src = &raw.data[..expected];
    let pixels = width * height;

    let bgr = match raw.pixel_format {
        PixelFormat::Bgr8 => src.to_vec(),
        PixelFormat::Rgb8 => src
            .chunks_exact(3)
            .flat_map(|p| [p[2], p[1], p[0]])
            .collect(),
        PixelFormat::Mono8 => src.iter().flat_map(|&v| [v, v, v]).collect(),
        // Little endian, keep the high byte
        PixelFormat::Mono16 => src
            .chunks_exact(2)
            .flat_map(|s| [s[1], s[1], s[1]])
            .collect(),
        bayer => {
            let mut out = vec![0u8; pixels * 3];
            demosaic_block(src, width, height, bayer, &mut out);
            out
        }
    };

    Ok(bgr)
}

/// Index into a BGR triplet of the colour filter at (`x`, `y`).
fn cfa_channel(format: PixelFormat, x: usize, y: usize) -> usize {
    const B: usize = 0;
    const G: usize = 1;
    const R: usize = 2;
    let site = (x & 1, y & 1);
    match (format, site) {
        (PixelFormat::BayerRg8, (0, 0)) | (PixelFormat::BayerBg8, (1, 1)) => R,
        (PixelFormat::BayerRg8, (1, 1)) | (PixelFormat::BayerBg8, (0, 0)) => B,
        (PixelFormat::BayerGr8, (1, 0)) | (PixelFormat::BayerGb8, (0, 1)) => R,
        (PixelFormat::BayerGr8, (0, 1)) | (PixelFormat::BayerGb8, (1, 0)) => B,
        _ => G,
    }
}

/// Fill every pixel of each 2x2 cell with the colour averaged over that cell.
///
/// Cells cut short by an odd width or height average what they have; a
/// missing channel stays black.
fn demosaic_block(src: &[u8], width: usize, height: usize, format: PixelFormat, out: &mut [u8]) {
    for by in (0..height).step_by(2) {
        for bx in (0..width).step_by(2) {
            let mut sum = [0u32; 3];
            let mut count = [0u32; 3];
            let ys = by..(by + 2).min(height);
            let xs = bx..(bx + 2).min(width);

            for y in ys.clone() {
                for x in xs.clone() {
                    let ch = cfa_channel(format, x, y);
                    sum[ch] += u32::from(src[y * width + x]);
                    count[ch] += 1;
                }
            }

            let mut bgr = [0u8; 3];
            for ch in 0..3 {
                if count[ch] > 0 {
                    bgr[ch] = (sum[ch] / count[ch]) as u8;
                }
            }

            for y in ys.clone() {
                for x in xs.clone() {
                    let idx = (y * width + x) * 3;
                    out[idx..idx + 3].copy_from_slice(&bgr);
                }
            }
        }
    }
}

struct Slot {
    frame: Arc<Frame>,
    next_sequence: u64,
}

/// Single-slot, latest-wins frame buffer shared between the acquisition
/// thread and any number of readers.
pub struct FrameExchange {
    slot: Mutex<Slot>,
    published: Condvar,
    dropped: AtomicU64,
}

impl FrameExchange {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            slot: Mutex::new(Slot {
                frame: Arc::new(Frame::black(width, height)),
                next_sequence: 1,
            }),
            published: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    // The slot only ever holds a complete frame, so a poisoned lock is safe
    // to keep using.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current frame with a black placeholder of the given size.
    pub fn reset(&self, width: u32, height: u32) {
        let placeholder = Arc::new(Frame::black(width, height));
        self.lock().frame = placeholder;
    }

    /// Publish BGR8 `data` as the latest frame and return its sequence number.
    pub fn publish(&self, width: u32, height: u32, data: Vec<u8>, frame_number: u64) -> u64 {
        let mut frame = Frame {
            width,
            height,
            data,
            sequence: 0,
            frame_number,
            received_at: Utc::now(),
        };

        let sequence = {
            let mut slot = self.lock();
            let sequence = slot.next_sequence;
            slot.next_sequence += 1;
            frame.sequence = sequence;
            slot.frame = Arc::new(frame);
            sequence
        };
        self.published.notify_all();
        sequence
    }

    /// Acquisition callback body. Never panics; frames that cannot be
    /// converted are dropped.
    pub fn on_frame_acquired(&self, raw: &RawImage<'_>) {
        match convert_to_bgr(raw) {
            Ok(data) => {
                self.publish(raw.width, raw.height, data, raw.frame_number);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Dropping frame {}: {}", raw.frame_number, e);
            }
        }
    }

    /// Independent copy of the most recent frame.
    pub fn latest(&self) -> Frame {
        let shared = Arc::clone(&self.lock().frame);
        (*shared).clone()
    }

    /// The most recent frame without copying pixel data.
    pub fn latest_shared(&self) -> Arc<Frame> {
        Arc::clone(&self.lock().frame)
    }

    /// Sequence number of the current frame, 0 for the placeholder.
    pub fn sequence(&self) -> u64 {
        self.lock().frame.sequence
    }

    /// Block until a frame with a sequence above `after` is published.
    ///
    /// Returns `None` if `timeout` elapses first.
    pub fn wait_for_newer(&self, after: u64, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if slot.frame.sequence > after {
                let shared = Arc::clone(&slot.frame);
                drop(slot);
                return Some((*shared).clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, _) = self
                .published
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = next;
        }
    }

    /// Number of raw images that could not be converted.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Cloneable read-only handle on a camera's [`FrameExchange`].
#[derive(Clone)]
pub struct FrameReader {
    exchange: Arc<FrameExchange>,
}

impl FrameReader {
    pub(crate) fn new(exchange: Arc<FrameExchange>) -> Self {
        Self { exchange }
    }

    pub fn latest(&self) -> Frame {
        self.exchange.latest()
    }

    pub fn sequence(&self) -> u64 {
        self.exchange.sequence()
    }

    pub fn wait_for_newer(&self, after: u64, timeout: Duration) -> Option<Frame> {
        self.exchange.wait_for_newer(after, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(data: &[u8], width: u32, height: u32, pixel_format: PixelFormat) -> RawImage<'_> {
        RawImage {
            data,
            width,
            height,
            pixel_format,
            frame_number: 1,
        }
    }

    #[test]
    fn test_placeholder_is_black_at_requested_size() {
        let exchange = FrameExchange::new(8, 4);
        let frame = exchange.latest();
        assert_eq!((frame.width, frame.height), (8, 4));
        assert_eq!(frame.data.len(), 8 * 4 * 3);
        assert!(frame.data.iter().all(|&b| b == 0));
        assert!(frame.is_placeholder());
    }

    #[test]
    fn test_publish_assigns_increasing_sequence() {
        let exchange = FrameExchange::new(1, 1);
        assert_eq!(exchange.publish(1, 1, vec![1, 2, 3], 10), 1);
        assert_eq!(exchange.publish(1, 1, vec![4, 5, 6], 11), 2);

        let frame = exchange.latest();
        assert_eq!(frame.sequence, 2);
        assert_eq!(frame.frame_number, 11);
        assert_eq!(frame.pixel(0, 0), Some([4, 5, 6]));
    }

    #[test]
    fn test_latest_is_a_deep_copy() {
        let exchange = FrameExchange::new(1, 1);
        exchange.publish(1, 1, vec![9, 9, 9], 1);

        let mut copy = exchange.latest();
        copy.data[0] = 0;
        assert_eq!(exchange.latest().data[0], 9);
    }

    #[test]
    fn test_reset_keeps_sequence_monotonic() {
        let exchange = FrameExchange::new(2, 2);
        exchange.publish(2, 2, vec![1; 12], 1);
        exchange.reset(4, 4);
        assert_eq!(exchange.sequence(), 0);
        assert_eq!(exchange.publish(4, 4, vec![1; 48], 1), 2);
    }

    #[test]
    fn test_short_buffer_is_dropped() {
        let exchange = FrameExchange::new(4, 4);
        exchange.on_frame_acquired(&raw(&[0u8; 3], 4, 4, PixelFormat::Mono8));
        assert_eq!(exchange.sequence(), 0);
        assert_eq!(exchange.dropped_frames(), 1);
    }

    #[test]
    fn test_wait_for_newer_times_out() {
        let exchange = FrameExchange::new(1, 1);
        assert!(exchange
            .wait_for_newer(0, Duration::from_millis(20))
            .is_none());
    }

    #[test]
    fn test_wait_for_newer_wakes_on_publish() {
        let exchange = Arc::new(FrameExchange::new(1, 1));
        let publisher = Arc::clone(&exchange);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher.publish(1, 1, vec![7, 7, 7], 3);
        });

        let frame = exchange.wait_for_newer(0, Duration::from_secs(5)).unwrap();
        assert_eq!(frame.frame_number, 3);
        handle.join().unwrap();
    }

    #[test]
    fn test_convert_rgb_and_mono() {
        let bgr = convert_to_bgr(&raw(&[10, 20, 30], 1, 1, PixelFormat::Rgb8)).unwrap();
        assert_eq!(bgr, vec![30, 20, 10]);

        let bgr = convert_to_bgr(&raw(&[42], 1, 1, PixelFormat::Mono8)).unwrap();
        assert_eq!(bgr, vec![42, 42, 42]);

        let bgr = convert_to_bgr(&raw(&[0x34, 0x12], 1, 1, PixelFormat::Mono16)).unwrap();
        assert_eq!(bgr, vec![0x12, 0x12, 0x12]);
    }

    #[test]
    fn test_convert_bayer_cell() {
        // R G
        // G B
        let data = [200, 100, 50, 0];
        let bgr = convert_to_bgr(&raw(&data, 2, 2, PixelFormat::BayerRg8)).unwrap();
        assert_eq!(&bgr[..3], &[0, 75, 200]);
        assert!(bgr.chunks_exact(3).all(|p| p == [0, 75, 200]));

        let bgr = convert_to_bgr(&raw(&data, 2, 2, PixelFormat::BayerBg8)).unwrap();
        assert_eq!(&bgr[..3], &[200, 75, 0]);
    }

    #[test]
    fn test_convert_bayer_odd_size() {
        let data = [255u8; 9];
        let bgr = convert_to_bgr(&raw(&data, 3, 3, PixelFormat::BayerGr8)).unwrap();
        assert_eq!(bgr.len(), 27);
        // The bottom-right cell only holds a green site.
        assert_eq!(&bgr[24..27], &[0, 255, 0]);
    }

    #[test]
    fn test_convert_rejects_empty_image() {
        assert_eq!(
            convert_to_bgr(&raw(&[], 0, 4, PixelFormat::Mono8)),
            Err(ConversionError::EmptyImage {
                width: 0,
                height: 4
            })
        );
    }
}
