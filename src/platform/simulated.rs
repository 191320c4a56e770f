//! In-memory implementation of the vendor layer.
//!
//! `SimulatedSdk` behaves like the vendor API as far as the driver can tell:
//! per-model parameter ranges, unsupported parameters failing their range
//! query, geometry snapped to its increment, and an acquisition thread per
//! stream that invokes the registered callback. It also records every call so
//! tests can assert on ordering, and can be told to fail specific operations.

use super::{
    AcquisitionMode, CameraSdk, DeviceHandle, DeviceMode, FrameCallback, ParamId, ParamValue,
    RawImage, SdkError, SdkResult, StreamHandle,
};
use crate::testing::synthetic_raw_frame;
use crate::types::{CameraInfo, CameraType, ParameterRange, PixelFormat, SystemInfo};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

const STATUS_NOT_INITIALIZED: u32 = 0x0001;
const STATUS_INJECTED: u32 = 0x0100;
const STATUS_OUT_OF_RANGE: u32 = 0x0200;
const STATUS_BUSY: u32 = 0x0300;
const STATUS_NOT_RUNNING: u32 = 0x0301;
const STATUS_NO_CALLBACK: u32 = 0x0302;

/// Description of one simulated camera model.
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    pub camera_type: CameraType,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub sensor_size: (u32, u32),
    pub pixel_format: PixelFormat,
    /// Parameters without an entry fail their range query.
    pub ranges: BTreeMap<ParamId, ParameterRange>,
}

impl SimulatedCamera {
    /// A colour USB3 camera implementing every parameter.
    pub fn color_usb3() -> Self {
        let mut ranges = BTreeMap::new();
        ranges.insert(ParamId::Width, ParameterRange::new(16.0, 1920.0).with_step(16.0));
        ranges.insert(ParamId::Height, ParameterRange::new(8.0, 1200.0).with_step(8.0));
        ranges.insert(ParamId::OffsetX, ParameterRange::new(0.0, 1904.0).with_step(16.0));
        ranges.insert(ParamId::OffsetY, ParameterRange::new(0.0, 1192.0).with_step(8.0));
        ranges.insert(ParamId::BinningX, ParameterRange::new(1.0, 2.0));
        ranges.insert(ParamId::BinningY, ParameterRange::new(1.0, 2.0));
        ranges.insert(ParamId::DecimationX, ParameterRange::new(1.0, 2.0));
        ranges.insert(ParamId::DecimationY, ParameterRange::new(1.0, 2.0));
        ranges.insert(ParamId::ExposureTime, ParameterRange::new(1.0, 1_000_000.0));
        ranges.insert(ParamId::Saturation, ParameterRange::new(0.0, 200.0));
        ranges.insert(ParamId::Gamma, ParameterRange::new(0.45, 2.5));
        ranges.insert(ParamId::Hue, ParameterRange::new(-40.0, 40.0));
        ranges.insert(ParamId::Gain, ParameterRange::new(0.0, 24.0));
        ranges.insert(ParamId::BlackLevel, ParameterRange::new(0.0, 64.0));
        ranges.insert(ParamId::FrameRate, ParameterRange::new(0.125, 60.0));
        ranges.insert(ParamId::Sharpness, ParameterRange::new(0.0, 10.0));
        ranges.insert(ParamId::BalanceRatioRed, ParameterRange::new(0.5, 4.0));
        ranges.insert(ParamId::BalanceRatioBlue, ParameterRange::new(0.5, 4.0));

        Self {
            camera_type: CameraType::U3v,
            manufacturer: "Simulated Imaging".to_string(),
            model: "SIM-U3V-C1920".to_string(),
            serial_number: "SC0001".to_string(),
            sensor_size: (1920, 1200),
            pixel_format: PixelFormat::BayerRg8,
            ranges,
        }
    }

    /// A monochrome USB3 camera exposing geometry, exposure, gain, black
    /// level and framerate only.
    pub fn mono_usb3() -> Self {
        let mut ranges = BTreeMap::new();
        ranges.insert(ParamId::Width, ParameterRange::new(8.0, 640.0).with_step(8.0));
        ranges.insert(ParamId::Height, ParameterRange::new(8.0, 480.0).with_step(2.0));
        ranges.insert(ParamId::OffsetX, ParameterRange::new(0.0, 632.0).with_step(8.0));
        ranges.insert(ParamId::OffsetY, ParameterRange::new(0.0, 472.0).with_step(2.0));
        ranges.insert(ParamId::ExposureTime, ParameterRange::new(10.0, 500_000.0));
        ranges.insert(ParamId::Gain, ParameterRange::new(0.0, 18.0));
        ranges.insert(ParamId::BlackLevel, ParameterRange::new(0.0, 32.0));
        ranges.insert(ParamId::FrameRate, ParameterRange::new(1.0, 120.0));

        Self {
            camera_type: CameraType::U3v,
            manufacturer: "Simulated Imaging".to_string(),
            model: "SIM-U3V-M640".to_string(),
            serial_number: "SM0001".to_string(),
            sensor_size: (640, 480),
            pixel_format: PixelFormat::Mono8,
            ranges,
        }
    }

    /// A GigE camera. Enumerates fine but is rejected by the driver.
    pub fn gige() -> Self {
        Self {
            camera_type: CameraType::Gev,
            model: "SIM-GEV-C1280".to_string(),
            serial_number: "SG0001".to_string(),
            ..Self::color_usb3()
        }
    }

    pub fn with_range(mut self, param: ParamId, range: ParameterRange) -> Self {
        self.ranges.insert(param, range);
        self
    }

    pub fn without(mut self, param: ParamId) -> Self {
        self.ranges.remove(&param);
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = serial.into();
        self
    }
}

/// One recorded call into the simulated SDK.
#[derive(Debug, Clone, PartialEq)]
pub enum SdkCall {
    SystemInit,
    SystemTerminate,
    Open(u32),
    Close(DeviceHandle),
    GetRange(ParamId),
    SetParam(ParamId, ParamValue),
    SetMode(DeviceMode),
    OpenStream(DeviceHandle),
    RegisterCallback(StreamHandle),
    Start(StreamHandle, AcquisitionMode),
    Stop(StreamHandle),
    CloseStream(StreamHandle),
}

/// Operations that can be forced to fail with [`SimulatedSdk::fail_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkOperation {
    SystemInit,
    SystemTerminate,
    SystemInfo,
    CameraInfo,
    Open,
    Close,
    SetParam(ParamId),
    SetMode,
    OpenStream,
    RegisterCallback,
    Start,
    Stop,
    CloseStream,
}

struct OpenDevice {
    camera: usize,
    values: HashMap<ParamId, ParamValue>,
    modes: HashMap<&'static str, DeviceMode>,
}

struct Worker {
    mode: AcquisitionMode,
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if self.thread.join().is_err() {
            log::warn!("Simulated acquisition thread panicked");
        }
    }
}

struct SimStream {
    device: DeviceHandle,
    callback: Option<FrameCallback>,
    worker: Option<Worker>,
    frame_counter: Arc<AtomicU64>,
}

struct SimState {
    initialized: bool,
    cameras: Vec<SimulatedCamera>,
    next_handle: u64,
    devices: HashMap<DeviceHandle, OpenDevice>,
    streams: HashMap<StreamHandle, SimStream>,
    failures: HashSet<SdkOperation>,
    calls: Vec<SdkCall>,
}

impl SimState {
    fn check(&self, op: SdkOperation) -> SdkResult<()> {
        if self.failures.contains(&op) {
            return Err(SdkError::Status {
                code: STATUS_INJECTED,
                message: format!("injected failure for {op:?}"),
            });
        }
        Ok(())
    }

    fn ensure_initialized(&self) -> SdkResult<()> {
        if !self.initialized {
            return Err(SdkError::Status {
                code: STATUS_NOT_INITIALIZED,
                message: "API not initialized".to_string(),
            });
        }
        Ok(())
    }

    fn device(&self, handle: DeviceHandle) -> SdkResult<(&OpenDevice, &SimulatedCamera)> {
        let device = self.devices.get(&handle).ok_or(SdkError::InvalidHandle)?;
        let camera = self
            .cameras
            .get(device.camera)
            .ok_or(SdkError::InvalidHandle)?;
        Ok((device, camera))
    }

    fn allocate_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn current_value(&self, handle: DeviceHandle, param: ParamId) -> SdkResult<ParamValue> {
        let (device, camera) = self.device(handle)?;
        let range = camera.ranges.get(&param).ok_or(SdkError::NotSupported)?;
        Ok(device
            .values
            .get(&param)
            .copied()
            .unwrap_or_else(|| default_value(param, range)))
    }
}

fn default_value(param: ParamId, range: &ParameterRange) -> ParamValue {
    match param {
        ParamId::Width | ParamId::Height => ParamValue::Int(range.max as u32),
        ParamId::FrameRate => ParamValue::Float(30.0f64.clamp(range.min, range.max)),
        p if is_integer(p) => ParamValue::Int(range.min as u32),
        _ => ParamValue::Float(range.min),
    }
}

fn is_integer(param: ParamId) -> bool {
    matches!(
        param,
        ParamId::Width
            | ParamId::Height
            | ParamId::OffsetX
            | ParamId::OffsetY
            | ParamId::BinningX
            | ParamId::BinningY
            | ParamId::DecimationX
            | ParamId::DecimationY
            | ParamId::Sharpness
    )
}

fn snap_to_step(value: f64, range: &ParameterRange) -> f64 {
    match range.step {
        Some(step) if step > 0.0 => range.min + ((value - range.min) / step).floor() * step,
        _ => value,
    }
}

/// Geometry and pacing captured when an acquisition starts.
struct AcquisitionPlan {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    interval: Duration,
}

fn deliver(callback: &FrameCallback, plan: &AcquisitionPlan, counter: &AtomicU64) {
    let frame_number = counter.fetch_add(1, Ordering::SeqCst) + 1;
    let data = synthetic_raw_frame(frame_number, plan.width, plan.height, plan.pixel_format);
    callback(&RawImage {
        data: &data,
        width: plan.width,
        height: plan.height,
        pixel_format: plan.pixel_format,
        frame_number,
    });
}

/// Simulated vendor layer.
pub struct SimulatedSdk {
    state: Mutex<SimState>,
}

impl Default for SimulatedSdk {
    fn default() -> Self {
        Self::new(vec![SimulatedCamera::color_usb3()])
    }
}

impl SimulatedSdk {
    pub fn new(cameras: Vec<SimulatedCamera>) -> Self {
        Self {
            state: Mutex::new(SimState {
                initialized: false,
                cameras,
                next_handle: 0,
                devices: HashMap::new(),
                streams: HashMap::new(),
                failures: HashSet::new(),
                calls: Vec::new(),
            }),
        }
    }

    /// Colour camera at index 0, mono camera at index 1, GigE camera at index 2.
    pub fn with_default_cameras() -> Self {
        Self::new(vec![
            SimulatedCamera::color_usb3(),
            SimulatedCamera::mono_usb3(),
            SimulatedCamera::gige(),
        ])
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent `op` fail with a vendor status.
    pub fn fail_on(&self, op: SdkOperation) {
        self.lock().failures.insert(op);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<SdkCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn count_calls(&self, predicate: impl Fn(&SdkCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn open_device_count(&self) -> usize {
        self.lock().devices.len()
    }

    pub fn open_stream_count(&self) -> usize {
        self.lock().streams.len()
    }

    /// Current device-side value of a parameter.
    pub fn param_value(&self, handle: DeviceHandle, param: ParamId) -> Option<ParamValue> {
        self.lock().current_value(handle, param).ok()
    }

    /// Last mode written for the given switch, looked up by [`DeviceMode::name`].
    pub fn mode(&self, handle: DeviceHandle, name: &str) -> Option<DeviceMode> {
        let state = self.lock();
        state.devices.get(&handle)?.modes.get(name).copied()
    }

    /// Invoke the stream's callback with `data` on the calling thread, as if
    /// the vendor had just acquired it. Returns the assigned frame number.
    pub fn inject_frame(
        &self,
        stream: StreamHandle,
        data: &[u8],
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
    ) -> SdkResult<u64> {
        let (callback, counter) = {
            let state = self.lock();
            let sim_stream = state.streams.get(&stream).ok_or(SdkError::InvalidHandle)?;
            let callback = sim_stream.callback.clone().ok_or(SdkError::Status {
                code: STATUS_NO_CALLBACK,
                message: "no callback registered".to_string(),
            })?;
            (callback, Arc::clone(&sim_stream.frame_counter))
        };

        let frame_number = counter.fetch_add(1, Ordering::SeqCst) + 1;
        callback(&RawImage {
            data,
            width,
            height,
            pixel_format,
            frame_number,
        });
        Ok(frame_number)
    }

    fn record(&self, call: SdkCall) -> MutexGuard<'_, SimState> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }
}

impl CameraSdk for SimulatedSdk {
    fn system_init(&self) -> SdkResult<()> {
        let mut state = self.record(SdkCall::SystemInit);
        state.check(SdkOperation::SystemInit)?;
        state.initialized = true;
        Ok(())
    }

    fn system_terminate(&self) -> SdkResult<()> {
        let mut state = self.record(SdkCall::SystemTerminate);
        state.check(SdkOperation::SystemTerminate)?;
        state.initialized = false;
        Ok(())
    }

    fn system_info(&self) -> SdkResult<SystemInfo> {
        let state = self.lock();
        state.ensure_initialized()?;
        state.check(SdkOperation::SystemInfo)?;
        Ok(SystemInfo {
            driver_version: "sim-driver 1.0.0".to_string(),
            api_version: format!("u3vcam-sim {}", env!("CARGO_PKG_VERSION")),
        })
    }

    fn camera_count(&self) -> SdkResult<u32> {
        let state = self.lock();
        state.ensure_initialized()?;
        Ok(state.cameras.len() as u32)
    }

    fn camera_info(&self, index: u32) -> SdkResult<CameraInfo> {
        let state = self.lock();
        state.ensure_initialized()?;
        state.check(SdkOperation::CameraInfo)?;
        let camera = state
            .cameras
            .get(index as usize)
            .ok_or(SdkError::NoSuchCamera(index))?;
        Ok(CameraInfo {
            index,
            camera_type: camera.camera_type,
            manufacturer: camera.manufacturer.clone(),
            model: camera.model.clone(),
            serial_number: camera.serial_number.clone(),
        })
    }

    fn open(&self, index: u32) -> SdkResult<DeviceHandle> {
        let mut state = self.record(SdkCall::Open(index));
        state.ensure_initialized()?;
        state.check(SdkOperation::Open)?;
        if index as usize >= state.cameras.len() {
            return Err(SdkError::NoSuchCamera(index));
        }
        let handle = DeviceHandle(state.allocate_handle());
        state.devices.insert(
            handle,
            OpenDevice {
                camera: index as usize,
                values: HashMap::new(),
                modes: HashMap::new(),
            },
        );
        Ok(handle)
    }

    fn close(&self, handle: DeviceHandle) -> SdkResult<()> {
        let workers = {
            let mut state = self.record(SdkCall::Close(handle));
            state.check(SdkOperation::Close)?;
            state.devices.remove(&handle).ok_or(SdkError::InvalidHandle)?;
            let orphaned: Vec<StreamHandle> = state
                .streams
                .iter()
                .filter(|(_, s)| s.device == handle)
                .map(|(h, _)| *h)
                .collect();
            orphaned
                .into_iter()
                .filter_map(|h| state.streams.remove(&h).and_then(|s| s.worker))
                .collect::<Vec<_>>()
        };
        workers.into_iter().for_each(Worker::shutdown);
        Ok(())
    }

    fn get_range(&self, handle: DeviceHandle, param: ParamId) -> SdkResult<ParameterRange> {
        let state = self.record(SdkCall::GetRange(param));
        let (_, camera) = state.device(handle)?;
        camera.ranges.get(&param).copied().ok_or(SdkError::NotSupported)
    }

    fn set_param(&self, handle: DeviceHandle, param: ParamId, value: ParamValue) -> SdkResult<()> {
        let mut state = self.record(SdkCall::SetParam(param, value));
        state.check(SdkOperation::SetParam(param))?;
        let (_, camera) = state.device(handle)?;
        let range = *camera.ranges.get(&param).ok_or(SdkError::NotSupported)?;

        let requested = value.as_f64();
        if !range.contains(requested) {
            return Err(SdkError::Status {
                code: STATUS_OUT_OF_RANGE,
                message: format!("{param} = {requested} outside {range}"),
            });
        }

        let stored = match value {
            ParamValue::Int(_) => ParamValue::Int(snap_to_step(requested, &range) as u32),
            ParamValue::Float(v) => ParamValue::Float(v),
        };
        if let Some(device) = state.devices.get_mut(&handle) {
            device.values.insert(param, stored);
        }
        Ok(())
    }

    fn get_param(&self, handle: DeviceHandle, param: ParamId) -> SdkResult<ParamValue> {
        self.lock().current_value(handle, param)
    }

    fn set_mode(&self, handle: DeviceHandle, mode: DeviceMode) -> SdkResult<()> {
        let mut state = self.record(SdkCall::SetMode(mode));
        state.check(SdkOperation::SetMode)?;
        let device = state.devices.get_mut(&handle).ok_or(SdkError::InvalidHandle)?;
        device.modes.insert(mode.name(), mode);
        Ok(())
    }

    fn sensor_size(&self, handle: DeviceHandle) -> SdkResult<(u32, u32)> {
        let state = self.lock();
        let (_, camera) = state.device(handle)?;
        Ok(camera.sensor_size)
    }

    fn open_stream(&self, handle: DeviceHandle) -> SdkResult<(StreamHandle, usize)> {
        let mut state = self.record(SdkCall::OpenStream(handle));
        state.check(SdkOperation::OpenStream)?;
        let (_, camera) = state.device(handle)?;
        let pixel_format = camera.pixel_format;
        let width = state.current_value(handle, ParamId::Width)?.as_f64() as u32;
        let height = state.current_value(handle, ParamId::Height)?.as_f64() as u32;

        let stream = StreamHandle(state.allocate_handle());
        state.streams.insert(
            stream,
            SimStream {
                device: handle,
                callback: None,
                worker: None,
                frame_counter: Arc::new(AtomicU64::new(0)),
            },
        );
        Ok((stream, pixel_format.buffer_size(width, height)))
    }

    fn register_callback(&self, stream: StreamHandle, callback: FrameCallback) -> SdkResult<()> {
        let mut state = self.record(SdkCall::RegisterCallback(stream));
        state.check(SdkOperation::RegisterCallback)?;
        let sim_stream = state.streams.get_mut(&stream).ok_or(SdkError::InvalidHandle)?;
        sim_stream.callback = Some(callback);
        Ok(())
    }

    fn start(&self, stream: StreamHandle, mode: AcquisitionMode) -> SdkResult<()> {
        let finished = {
            let mut state = self.record(SdkCall::Start(stream, mode));
            state.check(SdkOperation::Start)?;
            let sim_stream = state.streams.get_mut(&stream).ok_or(SdkError::InvalidHandle)?;
            // A single-frame acquisition stops itself; only continuous mode blocks.
            let running = sim_stream.worker.as_ref().is_some_and(|w| {
                w.mode == AcquisitionMode::Continuous && !w.thread.is_finished()
            });
            if running {
                return Err(SdkError::Status {
                    code: STATUS_BUSY,
                    message: "acquisition already running".to_string(),
                });
            }
            sim_stream.worker.take()
        };
        if let Some(worker) = finished {
            worker.shutdown();
        }

        let mut state = self.lock();
        let device = state.streams.get(&stream).ok_or(SdkError::InvalidHandle)?.device;
        let (_, camera) = state.device(device)?;
        let pixel_format = camera.pixel_format;
        let framerate = state
            .current_value(device, ParamId::FrameRate)
            .map(|v| v.as_f64())
            .unwrap_or(30.0);
        let plan = AcquisitionPlan {
            width: state.current_value(device, ParamId::Width)?.as_f64() as u32,
            height: state.current_value(device, ParamId::Height)?.as_f64() as u32,
            pixel_format,
            interval: Duration::from_secs_f64(1.0 / framerate.max(0.1)),
        };

        let sim_stream = state.streams.get_mut(&stream).ok_or(SdkError::InvalidHandle)?;
        let callback = sim_stream.callback.clone().ok_or(SdkError::Status {
            code: STATUS_NO_CALLBACK,
            message: "no callback registered".to_string(),
        })?;
        let counter = Arc::clone(&sim_stream.frame_counter);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("u3vcam-sim-acquisition".to_string())
            .spawn(move || match mode {
                AcquisitionMode::SingleFrame => deliver(&callback, &plan, &counter),
                AcquisitionMode::Continuous => loop {
                    deliver(&callback, &plan, &counter);
                    match stop_rx.recv_timeout(plan.interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                },
            })
            .map_err(|e| SdkError::Status {
                code: STATUS_BUSY,
                message: format!("failed to spawn acquisition thread: {e}"),
            })?;

        sim_stream.worker = Some(Worker {
            mode,
            stop_tx,
            thread,
        });
        Ok(())
    }

    fn stop(&self, stream: StreamHandle) -> SdkResult<()> {
        let worker = {
            let mut state = self.record(SdkCall::Stop(stream));
            state.check(SdkOperation::Stop)?;
            let sim_stream = state.streams.get_mut(&stream).ok_or(SdkError::InvalidHandle)?;
            sim_stream.worker.take().ok_or(SdkError::Status {
                code: STATUS_NOT_RUNNING,
                message: "acquisition not running".to_string(),
            })?
        };
        worker.shutdown();
        Ok(())
    }

    fn close_stream(&self, stream: StreamHandle) -> SdkResult<()> {
        let worker = {
            let mut state = self.record(SdkCall::CloseStream(stream));
            state.check(SdkOperation::CloseStream)?;
            let sim_stream = state.streams.remove(&stream).ok_or(SdkError::InvalidHandle)?;
            sim_stream.worker
        };
        if let Some(worker) = worker {
            worker.shutdown();
        }
        Ok(())
    }
}

impl Drop for SimulatedSdk {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, stream) in state.streams.drain() {
            if let Some(worker) = stream.worker {
                worker.shutdown();
            }
        }
    }
}
