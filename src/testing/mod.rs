//! Testing utilities for u3vcam
//!
//! Synthetic raw sensor buffers used by the simulated vendor layer, the
//! integration tests and the benchmarks.

pub mod synthetic_data;

pub use synthetic_data::{synthetic_raw_frame, uniform_raw_frame};
