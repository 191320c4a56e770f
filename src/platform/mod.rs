//! Vendor device layer.
//!
//! The driver never talks to a camera directly. Everything goes through
//! [`CameraSdk`], a thin object-safe facade over the vendor API. Methods take
//! `&self` so one SDK instance can be shared as `Arc<dyn CameraSdk>` between
//! the process context and every camera; implementations use interior
//! mutability.

pub mod simulated;

use crate::types::{CameraInfo, ParameterRange, PixelFormat, SystemInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use simulated::{SimulatedCamera, SimulatedSdk};

/// Opaque identifier of an opened camera session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Opaque identifier of an opened acquisition stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

/// Failure reported by the vendor layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SdkError {
    #[error("feature not supported by this camera")]
    NotSupported,
    #[error("invalid or closed handle")]
    InvalidHandle,
    #[error("no camera at index {0}")]
    NoSuchCamera(u32),
    #[error("vendor status {code:#06x}: {message}")]
    Status { code: u32, message: String },
}

pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// Numeric parameters the vendor API exposes range queries for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamId {
    Width,
    Height,
    OffsetX,
    OffsetY,
    BinningX,
    BinningY,
    DecimationX,
    DecimationY,
    ExposureTime,
    Saturation,
    Gamma,
    Hue,
    Gain,
    BlackLevel,
    FrameRate,
    Sharpness,
    BalanceRatioRed,
    BalanceRatioBlue,
}

impl ParamId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamId::Width => "width",
            ParamId::Height => "height",
            ParamId::OffsetX => "offset_x",
            ParamId::OffsetY => "offset_y",
            ParamId::BinningX => "binning_x",
            ParamId::BinningY => "binning_y",
            ParamId::DecimationX => "decimation_x",
            ParamId::DecimationY => "decimation_y",
            ParamId::ExposureTime => "exposure_time",
            ParamId::Saturation => "saturation",
            ParamId::Gamma => "gamma",
            ParamId::Hue => "hue",
            ParamId::Gain => "gain",
            ParamId::BlackLevel => "black_level",
            ParamId::FrameRate => "framerate",
            ParamId::Sharpness => "sharpness",
            ParamId::BalanceRatioRed => "balance_ratio_red",
            ParamId::BalanceRatioBlue => "balance_ratio_blue",
        }
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value written to or read from a numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ParamValue {
    Int(u32),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            ParamValue::Int(v) => f64::from(*v),
            ParamValue::Float(v) => *v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlMode {
    Manual,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BalanceWhiteAuto {
    Off,
    Once,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GainAuto {
    Off,
    Once,
    Continuous,
}

/// Mode switches. These are not range checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceMode {
    ExposureTimeControl(ControlMode),
    FrameRateControl(ControlMode),
    TriggerMode(bool),
    ReverseX(bool),
    ReverseY(bool),
    BalanceWhiteAuto(BalanceWhiteAuto),
    GainAuto(GainAuto),
}

impl DeviceMode {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceMode::ExposureTimeControl(_) => "exposure_time_control",
            DeviceMode::FrameRateControl(_) => "framerate_control",
            DeviceMode::TriggerMode(_) => "trigger_mode",
            DeviceMode::ReverseX(_) => "reverse_x",
            DeviceMode::ReverseY(_) => "reverse_y",
            DeviceMode::BalanceWhiteAuto(_) => "balance_white_auto",
            DeviceMode::GainAuto(_) => "gain_auto",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquisitionMode {
    Continuous,
    SingleFrame,
}

/// A raw image as handed over by the vendor acquisition thread.
///
/// The buffer belongs to the SDK and is only valid for the duration of the
/// callback.
#[derive(Debug, Clone, Copy)]
pub struct RawImage<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_number: u64,
}

/// Invoked on an SDK-owned thread once per acquired image.
pub type FrameCallback = Arc<dyn Fn(&RawImage<'_>) + Send + Sync>;

/// Facade over the vendor camera API.
pub trait CameraSdk: Send + Sync {
    fn system_init(&self) -> SdkResult<()>;
    fn system_terminate(&self) -> SdkResult<()>;
    fn system_info(&self) -> SdkResult<SystemInfo>;
    fn camera_count(&self) -> SdkResult<u32>;
    fn camera_info(&self, index: u32) -> SdkResult<CameraInfo>;

    fn open(&self, index: u32) -> SdkResult<DeviceHandle>;
    fn close(&self, handle: DeviceHandle) -> SdkResult<()>;

    /// Query the bounds of `param`. Failure means the camera model does not
    /// implement it.
    fn get_range(&self, handle: DeviceHandle, param: ParamId) -> SdkResult<ParameterRange>;
    fn set_param(&self, handle: DeviceHandle, param: ParamId, value: ParamValue) -> SdkResult<()>;
    fn get_param(&self, handle: DeviceHandle, param: ParamId) -> SdkResult<ParamValue>;
    fn set_mode(&self, handle: DeviceHandle, mode: DeviceMode) -> SdkResult<()>;
    /// Full sensor size in pixels, independent of the configured region.
    fn sensor_size(&self, handle: DeviceHandle) -> SdkResult<(u32, u32)>;

    /// Allocate a stream, returning its handle and the per-image buffer size.
    fn open_stream(&self, handle: DeviceHandle) -> SdkResult<(StreamHandle, usize)>;
    fn register_callback(&self, stream: StreamHandle, callback: FrameCallback) -> SdkResult<()>;
    fn start(&self, stream: StreamHandle, mode: AcquisitionMode) -> SdkResult<()>;
    fn stop(&self, stream: StreamHandle) -> SdkResult<()>;
    fn close_stream(&self, stream: StreamHandle) -> SdkResult<()>;
}
