//! Plain data types shared by the driver, the vendor facade and the CLI.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Information reported by the vendor API about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub driver_version: String,
    pub api_version: String,
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Camera API system info:")?;
        writeln!(f, "  Driver version: {}", self.driver_version)?;
        write!(f, "  API version: {}", self.api_version)
    }
}

/// Transport class of an enumerated camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraType {
    /// USB3-Vision, the only transport this driver accepts.
    U3v,
    /// GigE-Vision.
    Gev,
    Unknown,
}

impl CameraType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraType::U3v => "USB3-Vision",
            CameraType::Gev => "GigE-Vision",
            CameraType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CameraType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-camera information available before the camera is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub index: u32,
    pub camera_type: CameraType,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
}

impl fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Camera information:")?;
        writeln!(f, "  Camera ID: {}", self.index)?;
        writeln!(f, "  Transport: {}", self.camera_type)?;
        writeln!(f, "  Manufacturer: {}", self.manufacturer)?;
        writeln!(f, "  Model: {}", self.model)?;
        write!(f, "  Serial number: {}", self.serial_number)
    }
}

/// Lifecycle state of a [`crate::UsbCamera`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CameraState {
    Closed,
    CameraOpen,
    Configured,
    StreamOpen,
    Streaming,
    /// Single-frame acquisition in flight; only reachable from `StreamOpen`.
    Capturing,
}

impl CameraState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraState::Closed => "closed",
            CameraState::CameraOpen => "camera-open",
            CameraState::Configured => "configured",
            CameraState::StreamOpen => "stream-open",
            CameraState::Streaming => "streaming",
            CameraState::Capturing => "capturing",
        }
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel layout of a raw sensor buffer handed to the acquisition callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    /// Little-endian 16 bit samples.
    Mono16,
    Rgb8,
    Bgr8,
    BayerRg8,
    BayerGr8,
    BayerGb8,
    BayerBg8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Mono8
            | PixelFormat::BayerRg8
            | PixelFormat::BayerGr8
            | PixelFormat::BayerGb8
            | PixelFormat::BayerBg8 => 1,
            PixelFormat::Mono16 => 2,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }

    /// Size in bytes of a tightly packed `width` x `height` buffer.
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// Device-reported bounds of a numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    /// Increment, reported for geometry parameters only.
    pub step: Option<f64>,
}

impl ParameterRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            step: None,
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    /// Inclusive bounds check. NaN is never contained.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl fmt::Display for ParameterRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "[{}, {}] step {}", self.min, self.max, step),
            None => write!(f, "[{}, {}]", self.min, self.max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_contains_is_inclusive() {
        let range = ParameterRange::new(0.0, 24.0);
        assert!(range.contains(0.0));
        assert!(range.contains(24.0));
        assert!(!range.contains(24.000_001));
        assert!(!range.contains(-0.5));
        assert!(!range.contains(f64::NAN));
    }

    #[test]
    fn test_buffer_size() {
        assert_eq!(PixelFormat::Mono8.buffer_size(640, 480), 640 * 480);
        assert_eq!(PixelFormat::Mono16.buffer_size(640, 480), 640 * 480 * 2);
        assert_eq!(PixelFormat::Bgr8.buffer_size(4, 2), 24);
    }

    #[test]
    fn test_camera_info_display() {
        let info = CameraInfo {
            index: 2,
            camera_type: CameraType::U3v,
            manufacturer: "Acme".to_string(),
            model: "AC-1".to_string(),
            serial_number: "0042".to_string(),
        };
        let text = info.to_string();
        assert!(text.contains("Camera ID: 2"));
        assert!(text.contains("USB3-Vision"));
        assert!(text.contains("Serial number: 0042"));
    }
}
