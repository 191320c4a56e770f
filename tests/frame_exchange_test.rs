//! Concurrency tests for the latest-frame buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use u3vcam::frame::FrameExchange;
use u3vcam::platform::RawImage;
use u3vcam::testing::{synthetic_raw_frame, uniform_raw_frame};
use u3vcam::PixelFormat;

fn raw(data: &[u8], width: u32, height: u32, frame_number: u64) -> RawImage<'_> {
    RawImage {
        data,
        width,
        height,
        pixel_format: PixelFormat::Mono8,
        frame_number,
    }
}

#[cfg(test)]
mod concurrency_tests {
    use super::*;

    #[test]
    fn test_readers_never_see_torn_frames() {
        let exchange = Arc::new(FrameExchange::new(32, 16));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let exchange = Arc::clone(&exchange);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut last_sequence = 0;
                    let mut observed = 0u64;
                    loop {
                        let stop = done.load(Ordering::SeqCst);
                        let frame = exchange.latest();
                        assert_eq!(
                            frame.data.len(),
                            frame.width as usize * frame.height as usize * 3
                        );
                        let first = frame.data[0];
                        assert!(
                            frame.data.iter().all(|&b| b == first),
                            "torn frame at sequence {}",
                            frame.sequence
                        );
                        assert!(frame.sequence >= last_sequence);
                        last_sequence = frame.sequence;
                        observed += 1;
                        if stop {
                            break;
                        }
                    }
                    observed
                })
            })
            .collect();

        // Alternate sizes so a partial write would also break the length check
        for n in 1..=2000u64 {
            let (w, h) = if n % 2 == 0 { (32, 16) } else { (16, 8) };
            let data = uniform_raw_frame((n % 251) as u8, w, h, PixelFormat::Mono8);
            exchange.on_frame_acquired(&raw(&data, w, h, n));
        }
        done.store(true, Ordering::SeqCst);

        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
        assert_eq!(exchange.sequence(), 2000);
        assert_eq!(exchange.dropped_frames(), 0);
    }

    #[test]
    fn test_latest_wins() {
        let exchange = FrameExchange::new(8, 8);
        for n in 1..=5u64 {
            let data = synthetic_raw_frame(n, 8, 8, PixelFormat::Mono8);
            exchange.on_frame_acquired(&raw(&data, 8, 8, n));
        }

        let frame = exchange.latest();
        assert_eq!(frame.frame_number, 5);
        assert_eq!(frame.sequence, 5);
    }

    #[test]
    fn test_many_waiters_all_wake() {
        let exchange = Arc::new(FrameExchange::new(4, 4));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let exchange = Arc::clone(&exchange);
                thread::spawn(move || exchange.wait_for_newer(0, Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        let data = uniform_raw_frame(1, 4, 4, PixelFormat::Mono8);
        exchange.on_frame_acquired(&raw(&data, 4, 4, 42));

        for waiter in waiters {
            let frame = waiter.join().unwrap().expect("waiter timed out");
            assert_eq!(frame.frame_number, 42);
        }
    }
}
