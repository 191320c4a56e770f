//! Parameter validation and application.
//!
//! Every numeric parameter is described once in [`PARAMETERS`] and every mode
//! switch once in [`TOGGLES`]. [`apply_parameters`] walks both tables in
//! order, so the order of the tables is the order writes reach the device.

use crate::capabilities::CameraCapabilities;
use crate::config::CameraParameters;
use crate::errors::{CameraError, Result};
use crate::platform::{
    BalanceWhiteAuto, CameraSdk, ControlMode, DeviceHandle, DeviceMode, GainAuto, ParamId,
    ParamValue,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Whole number, written as [`ParamValue::Int`]
    Int,
    /// Written as [`ParamValue::Float`]
    Float,
}

/// Declarative description of one numeric parameter.
pub struct ParamSpec {
    pub id: ParamId,
    pub kind: ParamKind,
    /// A camera without this parameter cannot be driven at all.
    pub mandatory: bool,
    /// A requested value of 0 stands for the probed maximum.
    pub zero_means_max: bool,
    /// Mode switch that must be issued before the value is written.
    pub manual_mode: Option<DeviceMode>,
    pub get: fn(&CameraParameters) -> f64,
    pub set: fn(&mut CameraParameters, f64),
}

impl ParamSpec {
    pub fn name(&self) -> &'static str {
        self.id.as_str()
    }

    fn value(&self, v: f64) -> ParamValue {
        match self.kind {
            ParamKind::Int => ParamValue::Int(v as u32),
            ParamKind::Float => ParamValue::Float(v),
        }
    }
}

macro_rules! int_param {
    ($id:expr, $field:ident, mandatory = $mandatory:expr, zero_means_max = $zero:expr) => {
        ParamSpec {
            id: $id,
            kind: ParamKind::Int,
            mandatory: $mandatory,
            zero_means_max: $zero,
            manual_mode: None,
            get: |p| f64::from(p.$field),
            set: |p, v| p.$field = v as u32,
        }
    };
}

macro_rules! float_param {
    ($id:expr, $field:ident) => {
        float_param!($id, $field, None)
    };
    ($id:expr, $field:ident, $manual:expr) => {
        ParamSpec {
            id: $id,
            kind: ParamKind::Float,
            mandatory: false,
            zero_means_max: false,
            manual_mode: $manual,
            get: |p| p.$field,
            set: |p, v| p.$field = v,
        }
    };
}

/// Numeric parameters in application order.
pub static PARAMETERS: &[ParamSpec] = &[
    int_param!(ParamId::Width, width, mandatory = true, zero_means_max = true),
    int_param!(ParamId::Height, height, mandatory = true, zero_means_max = true),
    int_param!(ParamId::OffsetX, offset_x, mandatory = true, zero_means_max = false),
    int_param!(ParamId::OffsetY, offset_y, mandatory = true, zero_means_max = false),
    int_param!(ParamId::BinningX, binning_x, mandatory = false, zero_means_max = false),
    int_param!(ParamId::BinningY, binning_y, mandatory = false, zero_means_max = false),
    int_param!(ParamId::DecimationX, decimation_x, mandatory = false, zero_means_max = false),
    int_param!(ParamId::DecimationY, decimation_y, mandatory = false, zero_means_max = false),
    float_param!(
        ParamId::ExposureTime,
        exposure_time,
        Some(DeviceMode::ExposureTimeControl(ControlMode::Manual))
    ),
    float_param!(ParamId::Saturation, saturation),
    float_param!(ParamId::Gamma, gamma),
    float_param!(ParamId::Hue, hue),
    float_param!(ParamId::Gain, gain),
    float_param!(ParamId::BlackLevel, black_level),
    float_param!(
        ParamId::FrameRate,
        framerate,
        Some(DeviceMode::FrameRateControl(ControlMode::Manual))
    ),
    int_param!(ParamId::Sharpness, sharpness, mandatory = false, zero_means_max = false),
    float_param!(ParamId::BalanceRatioRed, balance_ratio_red),
    float_param!(ParamId::BalanceRatioBlue, balance_ratio_blue),
];

/// A boolean setting that maps onto a device mode switch.
pub struct ToggleSpec {
    pub name: &'static str,
    pub mode: fn(&CameraParameters) -> DeviceMode,
}

/// Mode switches in application order, written after all numeric parameters.
pub static TOGGLES: &[ToggleSpec] = &[
    ToggleSpec {
        name: "trigger_mode",
        mode: |p| DeviceMode::TriggerMode(p.trigger_mode),
    },
    ToggleSpec {
        name: "reverse_x",
        mode: |p| DeviceMode::ReverseX(p.reverse_x),
    },
    ToggleSpec {
        name: "reverse_y",
        mode: |p| DeviceMode::ReverseY(p.reverse_y),
    },
    ToggleSpec {
        name: "auto_white_balance",
        mode: |p| {
            DeviceMode::BalanceWhiteAuto(if p.auto_white_balance {
                BalanceWhiteAuto::Once
            } else {
                BalanceWhiteAuto::Off
            })
        },
    },
    ToggleSpec {
        name: "auto_gain",
        mode: |p| {
            DeviceMode::GainAuto(if p.auto_gain {
                GainAuto::Continuous
            } else {
                GainAuto::Off
            })
        },
    },
];

pub fn find_parameter(id: ParamId) -> Option<&'static ParamSpec> {
    PARAMETERS.iter().find(|spec| spec.id == id)
}

/// Outcome of a successful [`apply_parameters`] run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedParameters {
    /// Requested parameters with sentinels replaced by what was written.
    pub resolved: CameraParameters,
    /// Parameters the camera does not implement, left at their requested value.
    pub skipped: Vec<ParamId>,
}

/// Check `value` for `spec` against the probed range.
///
/// Returns the value to write, with the zero sentinel resolved, or `None`
/// when the camera does not implement the parameter.
pub fn validate_parameter(
    spec: &ParamSpec,
    capabilities: &CameraCapabilities,
    value: f64,
) -> Result<Option<f64>> {
    let Some(range) = capabilities.range(spec.id) else {
        return Ok(None);
    };

    let value = if spec.zero_means_max && value == 0.0 {
        range.max
    } else {
        value
    };

    if !range.contains(value) {
        return Err(CameraError::ParameterOutOfRange {
            name: spec.name(),
            value,
            min: range.min,
            max: range.max,
        });
    }

    Ok(Some(value))
}

/// Validate and write `requested` to the camera.
///
/// Stops at the first out-of-range value or vendor failure. Writes issued
/// before that point stay on the device.
pub fn apply_parameters(
    sdk: &dyn CameraSdk,
    handle: DeviceHandle,
    capabilities: &CameraCapabilities,
    requested: &CameraParameters,
) -> Result<AppliedParameters> {
    let mut resolved = requested.clone();
    let mut skipped = Vec::new();

    for spec in PARAMETERS {
        let Some(value) = validate_parameter(spec, capabilities, (spec.get)(requested))? else {
            log::debug!("Skipping {}: not supported by this camera", spec.name());
            skipped.push(spec.id);
            continue;
        };

        if let Some(mode) = spec.manual_mode {
            sdk.set_mode(handle, mode)
                .map_err(|e| CameraError::device(format!("set_mode({})", mode.name()), e))?;
        }

        sdk.set_param(handle, spec.id, spec.value(value))
            .map_err(|e| CameraError::device(format!("set({})", spec.name()), e))?;
        (spec.set)(&mut resolved, value);
        log::debug!("{} set to {}", spec.name(), value);
    }

    for toggle in TOGGLES {
        let mode = (toggle.mode)(requested);
        sdk.set_mode(handle, mode)
            .map_err(|e| CameraError::device(format!("set_mode({})", toggle.name), e))?;
        log::debug!("{} set to {:?}", toggle.name, mode);
    }

    Ok(AppliedParameters { resolved, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::simulated::{SdkCall, SdkOperation};
    use crate::platform::{SimulatedCamera, SimulatedSdk};
    use crate::types::ParameterRange;
    use std::collections::BTreeMap;

    fn setup(camera: SimulatedCamera) -> (SimulatedSdk, DeviceHandle, CameraCapabilities) {
        let sdk = SimulatedSdk::new(vec![camera]);
        sdk.system_init().unwrap();
        let handle = sdk.open(0).unwrap();
        let caps = CameraCapabilities::probe(&sdk, handle).unwrap();
        sdk.clear_calls();
        (sdk, handle, caps)
    }

    #[test]
    fn test_table_order_matches_param_ids() {
        let ids: Vec<ParamId> = PARAMETERS.iter().map(|s| s.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 18);
    }

    #[test]
    fn test_table_accessors_round_trip_fields() {
        let mut params = CameraParameters::default();
        for (i, spec) in PARAMETERS.iter().enumerate() {
            (spec.set)(&mut params, (i + 1) as f64);
        }
        for (i, spec) in PARAMETERS.iter().enumerate() {
            assert_eq!((spec.get)(&params), (i + 1) as f64, "{}", spec.name());
        }
    }

    #[test]
    fn test_zero_sentinel_resolves_to_max() {
        let caps = CameraCapabilities::from_ranges(BTreeMap::from([(
            ParamId::Width,
            ParameterRange::new(16.0, 1920.0),
        )]));
        let width = find_parameter(ParamId::Width).unwrap();
        let offset = find_parameter(ParamId::OffsetX).unwrap();

        assert_eq!(validate_parameter(width, &caps, 0.0).unwrap(), Some(1920.0));
        assert_eq!(validate_parameter(offset, &caps, 0.0).unwrap(), None);
    }

    #[test]
    fn test_exposure_switches_to_manual_first() {
        let (sdk, handle, caps) = setup(SimulatedCamera::color_usb3());
        apply_parameters(&sdk, handle, &caps, &CameraParameters::default()).unwrap();

        let calls = sdk.calls();
        let manual = calls
            .iter()
            .position(|c| {
                *c == SdkCall::SetMode(DeviceMode::ExposureTimeControl(ControlMode::Manual))
            })
            .unwrap();
        assert_eq!(
            calls[manual + 1],
            SdkCall::SetParam(ParamId::ExposureTime, ParamValue::Float(25000.0))
        );
    }

    #[test]
    fn test_out_of_range_aborts_with_bounds() {
        let (sdk, handle, caps) = setup(SimulatedCamera::color_usb3());
        let params = CameraParameters {
            gain: 30.0,
            ..CameraParameters::default()
        };

        let err = apply_parameters(&sdk, handle, &caps, &params).unwrap_err();
        match err {
            CameraError::ParameterOutOfRange {
                name,
                value,
                min,
                max,
            } => {
                assert_eq!((name, value, min, max), ("gain", 30.0, 0.0, 24.0));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(
            sdk.count_calls(|c| matches!(c, SdkCall::SetParam(ParamId::Gain, _))),
            0
        );
        assert_eq!(
            sdk.count_calls(|c| matches!(c, SdkCall::SetParam(ParamId::BlackLevel, _))),
            0
        );
        assert_eq!(sdk.count_calls(|c| matches!(c, SdkCall::SetMode(_))), 1);
    }

    #[test]
    fn test_unsupported_parameters_are_skipped() {
        let (sdk, handle, caps) = setup(SimulatedCamera::mono_usb3());
        let params = CameraParameters {
            saturation: 1e9,
            ..CameraParameters::default()
        };

        let applied = apply_parameters(&sdk, handle, &caps, &params).unwrap();
        assert!(applied.skipped.contains(&ParamId::Saturation));
        assert!(!applied.skipped.contains(&ParamId::Gain));
        assert_eq!(applied.resolved.width, 640);
        assert_eq!(
            sdk.count_calls(|c| matches!(c, SdkCall::SetParam(ParamId::Saturation, _))),
            0
        );
    }

    #[test]
    fn test_toggles_applied_last_in_order() {
        let (sdk, handle, caps) = setup(SimulatedCamera::color_usb3());
        let params = CameraParameters {
            auto_gain: true,
            auto_white_balance: false,
            reverse_y: true,
            ..CameraParameters::default()
        };
        apply_parameters(&sdk, handle, &caps, &params).unwrap();

        let calls = sdk.calls();
        assert_eq!(
            calls[calls.len() - 5..],
            [
                SdkCall::SetMode(DeviceMode::TriggerMode(false)),
                SdkCall::SetMode(DeviceMode::ReverseX(false)),
                SdkCall::SetMode(DeviceMode::ReverseY(true)),
                SdkCall::SetMode(DeviceMode::BalanceWhiteAuto(BalanceWhiteAuto::Off)),
                SdkCall::SetMode(DeviceMode::GainAuto(GainAuto::Continuous)),
            ]
        );
    }

    #[test]
    fn test_vendor_failure_names_the_operation() {
        let (sdk, handle, caps) = setup(SimulatedCamera::color_usb3());
        sdk.fail_on(SdkOperation::SetParam(ParamId::Hue));

        let err = apply_parameters(&sdk, handle, &caps, &CameraParameters::default()).unwrap_err();
        assert!(matches!(
            err,
            CameraError::DeviceOperationFailed { ref operation, .. } if operation == "set(hue)"
        ));
    }
}
