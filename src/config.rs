//! Configuration management for u3vcam
//!
//! Provides the requested camera parameters and the multi-camera viewer
//! configuration, loadable from JSON or TOML (chosen by file extension).

use crate::errors::CameraError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Requested acquisition parameters for one camera.
///
/// Width and height of `0` mean "use the device maximum".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraParameters {
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub binning_x: u32,
    pub binning_y: u32,
    pub decimation_x: u32,
    pub decimation_y: u32,
    /// Exposure time in microseconds
    pub exposure_time: f64,
    pub saturation: f64,
    pub gamma: f64,
    pub hue: f64,
    /// Gain in dB
    pub gain: f64,
    pub black_level: f64,
    /// Acquisition frame rate in Hz
    pub framerate: f64,
    pub sharpness: u32,
    #[serde(alias = "balance_ratio_r")]
    pub balance_ratio_red: f64,
    #[serde(alias = "balance_ratio_b")]
    pub balance_ratio_blue: f64,
    /// Applied as a one-shot white balance, not continuous
    pub auto_white_balance: bool,
    pub auto_gain: bool,
    pub trigger_mode: bool,
    pub reverse_x: bool,
    pub reverse_y: bool,
}

impl Default for CameraParameters {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            offset_x: 0,
            offset_y: 0,
            binning_x: 1,
            binning_y: 1,
            decimation_x: 1,
            decimation_y: 1,
            exposure_time: 25000.0,
            saturation: 100.0,
            gamma: 1.0,
            hue: 0.0,
            gain: 0.0,
            black_level: 0.0,
            framerate: 30.0,
            sharpness: 0,
            balance_ratio_red: 1.0,
            balance_ratio_blue: 1.0,
            auto_white_balance: true,
            auto_gain: false,
            trigger_mode: false,
            reverse_x: false,
            reverse_y: false,
        }
    }
}

impl CameraParameters {
    /// Load parameters for a single camera from a JSON or TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let params: CameraParameters = read_structured(path.as_ref())?;
        log::info!("Loaded camera parameters from {:?}", path.as_ref());
        Ok(params)
    }
}

impl fmt::Display for CameraParameters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Camera parameters:")?;
        writeln!(f, "  Width: {}", self.width)?;
        writeln!(f, "  Height: {}", self.height)?;
        writeln!(f, "  Offset X: {}", self.offset_x)?;
        writeln!(f, "  Offset Y: {}", self.offset_y)?;
        writeln!(f, "  Binning X: {}", self.binning_x)?;
        writeln!(f, "  Binning Y: {}", self.binning_y)?;
        writeln!(f, "  Decimation X: {}", self.decimation_x)?;
        writeln!(f, "  Decimation Y: {}", self.decimation_y)?;
        writeln!(f, "  Exposure time: {}", self.exposure_time)?;
        writeln!(f, "  Saturation: {}", self.saturation)?;
        writeln!(f, "  Gamma: {}", self.gamma)?;
        writeln!(f, "  Hue: {}", self.hue)?;
        writeln!(f, "  Gain: {}", self.gain)?;
        writeln!(f, "  Auto gain: {}", self.auto_gain)?;
        writeln!(f, "  Black level: {}", self.black_level)?;
        writeln!(f, "  Framerate: {}", self.framerate)?;
        writeln!(f, "  Sharpness: {}", self.sharpness)?;
        writeln!(f, "  Balance ratio R: {}", self.balance_ratio_red)?;
        writeln!(f, "  Balance ratio B: {}", self.balance_ratio_blue)?;
        writeln!(f, "  Auto white balance: {}", self.auto_white_balance)?;
        writeln!(f, "  Reverse X: {}", self.reverse_x)?;
        writeln!(f, "  Reverse Y: {}", self.reverse_y)?;
        write!(f, "  Trigger mode: {}", self.trigger_mode)
    }
}

/// One camera entry of the viewer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraEntry {
    pub cam_id: u32,
    /// Preview shrink factor, 1 keeps full size
    #[serde(default = "default_downscale_factor")]
    pub downscale_factor: u32,
    #[serde(default)]
    pub params: CameraParameters,
}

fn default_downscale_factor() -> u32 {
    1
}

/// Root configuration for the viewer CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Where saved frames are written
    pub output_directory: String,
    /// Polling rate of the display loop in Hz
    pub refresh_rate_hz: u32,
    pub cameras: Vec<CameraEntry>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            output_directory: "./data".to_string(),
            refresh_rate_hz: 30,
            cameras: vec![CameraEntry {
                cam_id: 0,
                downscale_factor: 1,
                params: CameraParameters::default(),
            }],
        }
    }
}

impl ViewerConfig {
    /// Load configuration from a JSON or TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let config: ViewerConfig = read_structured(path.as_ref())?;
        config.validate().map_err(CameraError::Config)?;
        log::info!("Loaded configuration from {:?}", path.as_ref());
        Ok(config)
    }

    /// Save configuration to a JSON or TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let contents = match Format::of(path) {
            Format::Json => serde_json::to_string_pretty(self).map_err(|e| {
                CameraError::Config(format!("Failed to serialize config: {}", e))
            })?,
            Format::Toml => toml::to_string_pretty(self).map_err(|e| {
                CameraError::Config(format!("Failed to serialize config: {}", e))
            })?,
        };

        fs::write(path, contents)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("u3vcam.json")
    }

    /// Entry for the given camera id, if configured
    pub fn camera(&self, cam_id: u32) -> Option<&CameraEntry> {
        self.cameras.iter().find(|c| c.cam_id == cam_id)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.cameras.is_empty() {
            return Err("At least one camera must be configured".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for camera in &self.cameras {
            if !seen.insert(camera.cam_id) {
                return Err(format!("Camera {} configured twice", camera.cam_id));
            }
            if camera.downscale_factor == 0 {
                return Err(format!(
                    "Camera {}: downscale_factor must be at least 1",
                    camera.cam_id
                ));
            }
        }

        if self.refresh_rate_hz == 0 || self.refresh_rate_hz > 1000 {
            return Err("Refresh rate must be between 1 and 1000 Hz".to_string());
        }

        if self.output_directory.trim().is_empty() {
            return Err("Output directory must not be empty".to_string());
        }

        Ok(())
    }
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Format::Toml,
            _ => Format::Json,
        }
    }
}

fn read_structured<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CameraError> {
    let contents = fs::read_to_string(path).map_err(|e| {
        CameraError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;

    match Format::of(path) {
        Format::Json => serde_json::from_str(&contents).map_err(|e| {
            CameraError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        }),
        Format::Toml => toml::from_str(&contents).map_err(|e| {
            CameraError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        }),
    }
}
