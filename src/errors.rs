use crate::platform::SdkError;
use crate::types::{CameraState, CameraType};

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// A vendor call returned non-success. Never retried.
    #[error("device operation failed: {operation}: {source}")]
    DeviceOperationFailed {
        operation: String,
        #[source]
        source: SdkError,
    },

    #[error("parameter {name} out of range: {value} not in [{min}, {max}]")]
    ParameterOutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("camera {index} is a {camera_type} camera, only USB3-Vision cameras are supported")]
    UnsupportedCameraType { index: u32, camera_type: CameraType },

    #[error("camera {index} not found")]
    DeviceNotFound { index: u32 },

    #[error("cannot {operation} while camera is {state}")]
    InvalidState {
        operation: &'static str,
        state: CameraState,
    },

    #[error("camera API is not initialized")]
    ApiNotInitialized,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl CameraError {
    pub(crate) fn device(operation: impl Into<String>, source: SdkError) -> Self {
        CameraError::DeviceOperationFailed {
            operation: operation.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;
