//! u3vcam: USB3-Vision camera driver with capability-negotiated
//! configuration and asynchronous frame delivery.
//!
//! # Features
//! - Per-model capability probing of every acquisition parameter
//! - Range-checked parameter application in a fixed device order
//! - Explicit stream lifecycle (open, stream, single-frame capture, teardown)
//! - Lock-protected latest-frame buffer fed by the vendor acquisition thread
//! - JSON/TOML configuration and JPEG frame storage
//!
//! # Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use u3vcam::{CameraParameters, SdkContext, SimulatedSdk, UsbCamera};
//!
//! fn main() -> u3vcam::Result<()> {
//!     let context = SdkContext::initialized(Arc::new(SimulatedSdk::default()))?;
//!     let mut camera = UsbCamera::new(context, 0, CameraParameters::default());
//!     camera.initialize()?;
//!     camera.start_stream()?;
//!     let frame = camera.get_last_frame();
//!     println!("{}x{} frame #{}", frame.width, frame.height, frame.sequence);
//!     camera.destroy()
//! }
//! ```
pub mod camera;
pub mod capabilities;
pub mod config;
pub mod controls;
pub mod errors;
pub mod frame;
pub mod platform;
pub mod storage;
pub mod system;
pub mod types;

// Testing utilities - synthetic raw sensor data for offline testing
pub mod testing;

// Re-exports for convenience
pub use camera::{EffectiveConfiguration, UsbCamera};
pub use capabilities::{CameraCapabilities, SupportedFeatures};
pub use config::{CameraEntry, CameraParameters, ViewerConfig};
pub use errors::{CameraError, Result};
pub use frame::{Frame, FrameExchange, FrameReader};
pub use platform::{CameraSdk, SimulatedCamera, SimulatedSdk};
pub use system::SdkContext;
pub use types::{CameraInfo, CameraState, CameraType, ParameterRange, PixelFormat, SystemInfo};

/// Initialize logging for the camera driver
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "u3vcam=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "u3vcam");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_init_logging_is_repeatable() {
        init_logging();
        init_logging();
    }
}
