//! USB3-Vision camera lifecycle.
//!
//! ```text
//! Closed -> CameraOpen -> Configured -> StreamOpen <-> Streaming
//!                                           |
//!                                       Capturing
//! ```
//!
//! Lifecycle calls take `&mut self`; the frame buffer is the only state
//! shared with the vendor acquisition thread.

use crate::capabilities::{CameraCapabilities, SupportedFeatures};
use crate::config::CameraParameters;
use crate::controls::apply_parameters;
use crate::errors::{CameraError, Result};
use crate::frame::{Frame, FrameExchange, FrameReader};
use crate::platform::{
    AcquisitionMode, CameraSdk, DeviceHandle, FrameCallback, ParamId, RawImage, StreamHandle,
};
use crate::system::SdkContext;
use crate::types::{CameraInfo, CameraState, CameraType};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// What actually ended up on the device after [`UsbCamera::initialize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfiguration {
    /// Requested parameters with sentinels resolved.
    pub parameters: CameraParameters,
    /// Parameters the camera does not implement.
    pub skipped: Vec<ParamId>,
    /// Read back from the device after all writes.
    pub width: u32,
    pub height: u32,
    /// `None` when the camera has no framerate control.
    pub framerate: Option<f64>,
    pub sensor_width: u32,
    pub sensor_height: u32,
}

pub struct UsbCamera {
    context: Arc<SdkContext>,
    index: u32,
    state: CameraState,
    info: Option<CameraInfo>,
    device: Option<DeviceHandle>,
    stream: Option<StreamHandle>,
    capabilities: Option<CameraCapabilities>,
    requested: CameraParameters,
    effective: Option<EffectiveConfiguration>,
    frames: Arc<FrameExchange>,
}

impl UsbCamera {
    /// Create a closed camera for device `index`. No vendor call is made
    /// until [`initialize`](Self::initialize).
    pub fn new(context: Arc<SdkContext>, index: u32, parameters: CameraParameters) -> Self {
        let frames = Arc::new(FrameExchange::new(parameters.width, parameters.height));
        Self {
            context,
            index,
            state: CameraState::Closed,
            info: None,
            device: None,
            stream: None,
            capabilities: None,
            requested: parameters,
            effective: None,
            frames,
        }
    }

    fn sdk(&self) -> &dyn CameraSdk {
        self.context.sdk().as_ref()
    }

    /// Open the camera, probe and apply parameters, and open its stream.
    ///
    /// An already initialized camera is torn down first. On failure the
    /// camera stays in the last state reached; `destroy` releases it.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != CameraState::Closed {
            log::info!("Camera {} re-initializing, closing current session", self.index);
            self.destroy()?;
        }

        self.context.ensure_initialized()?;

        let index = self.index;
        let info = self.sdk().camera_info(index).map_err(|e| {
            log::debug!("Camera {} info query failed: {}", index, e);
            CameraError::DeviceNotFound { index }
        })?;
        if info.camera_type != CameraType::U3v {
            return Err(CameraError::UnsupportedCameraType {
                index: self.index,
                camera_type: info.camera_type,
            });
        }
        log::info!("{info}");

        let device = self
            .sdk()
            .open(self.index)
            .map_err(|e| CameraError::device("open", e))?;
        self.device = Some(device);
        self.info = Some(info);
        self.state = CameraState::CameraOpen;

        let capabilities = CameraCapabilities::probe(self.sdk(), device)?;
        let applied = apply_parameters(self.sdk(), device, &capabilities, &self.requested);
        self.capabilities = Some(capabilities);
        let applied = applied?;

        let effective = self.read_back(device, applied.resolved, applied.skipped)?;
        self.frames.reset(effective.width, effective.height);
        log::info!("{}", effective.parameters);
        self.effective = Some(effective);
        self.state = CameraState::Configured;

        let (stream, buffer_size) = self
            .sdk()
            .open_stream(device)
            .map_err(|e| CameraError::device("open_stream", e))?;
        self.stream = Some(stream);
        log::debug!("Stream opened, {} bytes per image", buffer_size);

        let exchange = Arc::clone(&self.frames);
        let callback: FrameCallback =
            Arc::new(move |raw: &RawImage<'_>| exchange.on_frame_acquired(raw));
        self.sdk()
            .register_callback(stream, callback)
            .map_err(|e| CameraError::device("register_callback", e))?;
        self.state = CameraState::StreamOpen;

        log::info!("Camera {} initialized", self.index);
        Ok(())
    }

    fn read_back(
        &self,
        device: DeviceHandle,
        parameters: CameraParameters,
        skipped: Vec<ParamId>,
    ) -> Result<EffectiveConfiguration> {
        let sdk = self.sdk();
        let read = |param: ParamId| {
            sdk.get_param(device, param)
                .map(|v| v.as_f64())
                .map_err(|e| CameraError::device(format!("get({param})"), e))
        };

        let width = read(ParamId::Width)? as u32;
        let height = read(ParamId::Height)? as u32;
        let framerate = if skipped.contains(&ParamId::FrameRate) {
            None
        } else {
            Some(read(ParamId::FrameRate)?)
        };
        let (sensor_width, sensor_height) = sdk
            .sensor_size(device)
            .map_err(|e| CameraError::device("sensor_size", e))?;

        Ok(EffectiveConfiguration {
            parameters,
            skipped,
            width,
            height,
            framerate,
            sensor_width,
            sensor_height,
        })
    }

    /// Start continuous acquisition. Already streaming is a no-op.
    pub fn start_stream(&mut self) -> Result<()> {
        match (self.state, self.stream) {
            (CameraState::Streaming, _) => {
                log::debug!("Camera {} already streaming", self.index);
                Ok(())
            }
            (CameraState::StreamOpen, Some(stream)) => {
                self.sdk()
                    .start(stream, AcquisitionMode::Continuous)
                    .map_err(|e| CameraError::device("start", e))?;
                self.state = CameraState::Streaming;
                log::info!("Camera {} streaming", self.index);
                Ok(())
            }
            (state, _) => Err(CameraError::InvalidState {
                operation: "start stream",
                state,
            }),
        }
    }

    /// Stop continuous acquisition. A camera that is not streaming is left
    /// alone.
    pub fn stop_stream(&mut self) -> Result<()> {
        let (CameraState::Streaming, Some(stream)) = (self.state, self.stream) else {
            log::debug!("Camera {} not streaming, nothing to stop", self.index);
            return Ok(());
        };

        self.sdk()
            .stop(stream)
            .map_err(|e| CameraError::device("stop", e))?;
        self.state = CameraState::StreamOpen;
        log::info!("Camera {} stream stopped", self.index);
        Ok(())
    }

    /// Trigger a single-frame acquisition. Not allowed while streaming.
    pub fn capture_frame(&mut self) -> Result<()> {
        let (CameraState::StreamOpen, Some(stream)) = (self.state, self.stream) else {
            return Err(CameraError::InvalidState {
                operation: "capture frame",
                state: self.state,
            });
        };

        self.state = CameraState::Capturing;
        let result = self.sdk().start(stream, AcquisitionMode::SingleFrame);
        self.state = CameraState::StreamOpen;
        result.map_err(|e| CameraError::device("start", e))
    }

    /// Trigger a single frame and wait up to `timeout` for it to arrive.
    pub fn capture_frame_and_wait(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        let before = self.frames.sequence();
        self.capture_frame()?;
        Ok(self.frames.wait_for_newer(before, timeout))
    }

    /// Release everything in reverse order. Safe to call in any state and
    /// more than once.
    ///
    /// Teardown continues past failures; the first one is returned.
    pub fn destroy(&mut self) -> Result<()> {
        if self.state == CameraState::Closed {
            return Ok(());
        }

        let mut first_error = None;

        if self.state == CameraState::Streaming {
            if let Err(e) = self.stop_stream() {
                first_error.get_or_insert(e);
            }
        }

        if let Some(stream) = self.stream.take() {
            if let Err(e) = self.sdk().close_stream(stream) {
                first_error.get_or_insert(CameraError::device("close_stream", e));
            }
        }

        if let Some(device) = self.device.take() {
            if let Err(e) = self.sdk().close(device) {
                first_error.get_or_insert(CameraError::device("close", e));
            }
        }

        self.info = None;
        self.capabilities = None;
        self.effective = None;
        self.state = CameraState::Closed;
        log::info!("Camera {} closed", self.index);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Copy of the most recent frame, or a black frame before the first one.
    pub fn get_last_frame(&self) -> Frame {
        self.frames.latest()
    }

    /// Handle for polling frames from other threads.
    pub fn frame_reader(&self) -> FrameReader {
        FrameReader::new(Arc::clone(&self.frames))
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == CameraState::Streaming
    }

    /// Requested parameters.
    pub fn parameters(&self) -> &CameraParameters {
        &self.requested
    }

    /// Replace the requested parameters. Takes effect on the next
    /// [`initialize`](Self::initialize).
    pub fn set_parameters(&mut self, parameters: CameraParameters) {
        self.requested = parameters;
    }

    pub fn effective_configuration(&self) -> Option<&EffectiveConfiguration> {
        self.effective.as_ref()
    }

    pub fn capabilities(&self) -> Option<&CameraCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn supported_features(&self) -> Option<&SupportedFeatures> {
        self.capabilities.as_ref().map(CameraCapabilities::features)
    }

    pub fn camera_info(&self) -> Option<&CameraInfo> {
        self.info.as_ref()
    }

    pub fn device_handle(&self) -> Option<DeviceHandle> {
        self.device
    }

    pub fn stream_handle(&self) -> Option<StreamHandle> {
        self.stream
    }

    /// Raw images the frame buffer had to drop.
    pub fn dropped_frames(&self) -> u64 {
        self.frames.dropped_frames()
    }
}

impl Drop for UsbCamera {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::warn!("Error closing camera {} in drop: {}", self.index, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedSdk;

    fn camera() -> (Arc<SimulatedSdk>, UsbCamera) {
        let sdk = Arc::new(SimulatedSdk::with_default_cameras());
        let context = SdkContext::initialized(sdk.clone()).unwrap();
        (sdk, UsbCamera::new(context, 0, CameraParameters::default()))
    }

    #[test]
    fn test_new_camera_is_closed() {
        let (sdk, camera) = camera();
        assert_eq!(camera.state(), CameraState::Closed);
        assert!(camera.capabilities().is_none());
        assert_eq!(sdk.open_device_count(), 0);
    }

    #[test]
    fn test_initialize_reaches_stream_open() {
        let (_sdk, mut camera) = camera();
        camera.initialize().unwrap();

        assert_eq!(camera.state(), CameraState::StreamOpen);
        let effective = camera.effective_configuration().unwrap();
        assert_eq!((effective.width, effective.height), (1920, 1200));
        assert_eq!(effective.framerate, Some(30.0));
        assert_eq!(camera.camera_info().unwrap().model, "SIM-U3V-C1920");
    }

    #[test]
    fn test_start_requires_open_stream() {
        let (_sdk, mut camera) = camera();
        assert!(matches!(
            camera.start_stream(),
            Err(CameraError::InvalidState {
                state: CameraState::Closed,
                ..
            })
        ));
    }

    #[test]
    fn test_destroy_releases_everything() {
        let (sdk, mut camera) = camera();
        camera.initialize().unwrap();
        camera.destroy().unwrap();

        assert_eq!(camera.state(), CameraState::Closed);
        assert!(camera.capabilities().is_none());
        assert!(camera.camera_info().is_none());
        assert_eq!(sdk.open_device_count(), 0);
        assert_eq!(sdk.open_stream_count(), 0);
    }
}
