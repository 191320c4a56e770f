//! Process-scoped camera API context.
//!
//! The vendor API must be initialized once before any camera is touched and
//! terminated once when the process is done with it. `SdkContext` owns that
//! lifecycle explicitly; cameras hold an `Arc<SdkContext>` so the API cannot
//! be terminated underneath them by dropping the context.

use crate::errors::{CameraError, Result};
use crate::platform::CameraSdk;
use crate::types::{CameraInfo, SystemInfo};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct ContextState {
    initialized: bool,
    /// Set once the API has been terminated; it is never initialized again.
    terminated: bool,
    system_info: Option<SystemInfo>,
    camera_count: u32,
}

pub struct SdkContext {
    sdk: Arc<dyn CameraSdk>,
    state: Mutex<ContextState>,
}

impl SdkContext {
    /// Wrap a vendor layer. The API is not initialized yet.
    pub fn new(sdk: Arc<dyn CameraSdk>) -> Arc<Self> {
        Arc::new(Self {
            sdk,
            state: Mutex::new(ContextState::default()),
        })
    }

    /// Wrap a vendor layer and initialize the API in one step.
    pub fn initialized(sdk: Arc<dyn CameraSdk>) -> Result<Arc<Self>> {
        let context = Self::new(sdk);
        context.initialize()?;
        Ok(context)
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the vendor API. A second call is a no-op.
    ///
    /// The vendor API is initialized at most once per context: after
    /// [`terminate`](Self::terminate) this fails with `ApiNotInitialized`.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.lock();
        if state.initialized {
            log::debug!("Camera API already initialized");
            return Ok(());
        }
        if state.terminated {
            log::warn!("Camera API was terminated and cannot be initialized again");
            return Err(CameraError::ApiNotInitialized);
        }

        self.sdk
            .system_init()
            .map_err(|e| CameraError::device("system_init", e))?;
        state.initialized = true;
        log::info!("Camera API initialized");
        Ok(())
    }

    /// Terminate the vendor API. Calling it on an uninitialized context is a
    /// logged no-op.
    pub fn terminate(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.initialized {
            log::warn!("Camera API terminate requested but API is not initialized");
            return Ok(());
        }

        self.sdk
            .system_terminate()
            .map_err(|e| CameraError::device("system_terminate", e))?;
        *state = ContextState {
            terminated: true,
            ..ContextState::default()
        };
        log::info!("Camera API terminated");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn sdk(&self) -> &Arc<dyn CameraSdk> {
        &self.sdk
    }

    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CameraError::ApiNotInitialized)
        }
    }

    /// Re-read system information and the number of attached cameras.
    pub fn refresh(&self) -> Result<(SystemInfo, u32)> {
        self.ensure_initialized()?;
        let info = self
            .sdk
            .system_info()
            .map_err(|e| CameraError::device("system_info", e))?;
        let count = self
            .sdk
            .camera_count()
            .map_err(|e| CameraError::device("camera_count", e))?;

        let mut state = self.lock();
        state.system_info = Some(info.clone());
        state.camera_count = count;
        Ok((info, count))
    }

    /// System information from the last [`refresh`](Self::refresh).
    pub fn system_info(&self) -> Option<SystemInfo> {
        self.lock().system_info.clone()
    }

    /// Camera count from the last [`refresh`](Self::refresh).
    pub fn camera_count(&self) -> u32 {
        self.lock().camera_count
    }

    /// Information for every attached camera, whatever its transport.
    pub fn enumerate(&self) -> Result<Vec<CameraInfo>> {
        let (_, count) = self.refresh()?;
        (0..count)
            .map(|index| {
                self.sdk
                    .camera_info(index)
                    .map_err(|_| CameraError::DeviceNotFound { index })
            })
            .collect()
    }

    /// Log system information at info level.
    pub fn log_system_info(&self) {
        let state = self.lock();
        match &state.system_info {
            Some(info) => {
                log::info!("{info}");
                log::info!("  Number of cameras: {}", state.camera_count);
            }
            None => log::info!("Camera API system info not available yet"),
        }
    }
}

impl Drop for SdkContext {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            log::warn!("Error terminating camera API in drop: {}", e);
        }
    }
}
