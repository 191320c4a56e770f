//! Property tests for parameter validation and application.
//!
//! Run with: cargo test --test parameter_application_test

use proptest::prelude::*;
use u3vcam::capabilities::CameraCapabilities;
use u3vcam::controls::{apply_parameters, PARAMETERS, TOGGLES};
use u3vcam::platform::simulated::SdkCall;
use u3vcam::platform::{
    CameraSdk, ControlMode, DeviceHandle, DeviceMode, ParamId, ParamValue, SimulatedCamera,
    SimulatedSdk,
};
use u3vcam::{CameraError, CameraParameters};

fn open(camera: SimulatedCamera) -> (SimulatedSdk, DeviceHandle, CameraCapabilities) {
    let sdk = SimulatedSdk::new(vec![camera]);
    sdk.system_init().unwrap();
    let handle = sdk.open(0).unwrap();
    let caps = CameraCapabilities::probe(&sdk, handle).unwrap();
    sdk.clear_calls();
    (sdk, handle, caps)
}

fn set_params(sdk: &SimulatedSdk) -> Vec<ParamId> {
    sdk.calls()
        .into_iter()
        .filter_map(|c| match c {
            SdkCall::SetParam(id, _) => Some(id),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod ordering_tests {
    use super::*;

    #[test]
    fn test_writes_follow_table_order() {
        let (sdk, handle, caps) = open(SimulatedCamera::color_usb3());
        apply_parameters(&sdk, handle, &caps, &CameraParameters::default()).unwrap();

        let expected: Vec<ParamId> = PARAMETERS.iter().map(|s| s.id).collect();
        assert_eq!(set_params(&sdk), expected);

        let modes = sdk.count_calls(|c| matches!(c, SdkCall::SetMode(_)));
        assert_eq!(modes, TOGGLES.len() + 2);
    }

    #[test]
    fn test_manual_modes_precede_their_parameter() {
        let (sdk, handle, caps) = open(SimulatedCamera::color_usb3());
        apply_parameters(&sdk, handle, &caps, &CameraParameters::default()).unwrap();
        let calls = sdk.calls();

        for (mode, param) in [
            (
                DeviceMode::ExposureTimeControl(ControlMode::Manual),
                ParamId::ExposureTime,
            ),
            (
                DeviceMode::FrameRateControl(ControlMode::Manual),
                ParamId::FrameRate,
            ),
        ] {
            let m = calls.iter().position(|c| *c == SdkCall::SetMode(mode)).unwrap();
            assert!(
                matches!(calls[m + 1], SdkCall::SetParam(id, _) if id == param),
                "{mode:?} must directly precede {param}"
            );
        }
    }

    #[test]
    fn test_manual_mode_not_issued_for_unsupported_framerate() {
        let camera = SimulatedCamera::mono_usb3().without(ParamId::FrameRate);
        let (sdk, handle, caps) = open(camera);
        apply_parameters(&sdk, handle, &caps, &CameraParameters::default()).unwrap();

        assert_eq!(
            sdk.count_calls(|c| *c == SdkCall::SetMode(DeviceMode::FrameRateControl(ControlMode::Manual))),
            0
        );
    }

    #[test]
    fn test_exposure_written_in_manual_mode() {
        let (sdk, handle, caps) = open(SimulatedCamera::color_usb3());
        apply_parameters(&sdk, handle, &caps, &CameraParameters::default()).unwrap();

        assert_eq!(
            sdk.param_value(handle, ParamId::ExposureTime),
            Some(ParamValue::Float(25000.0))
        );
        assert_eq!(
            sdk.mode(handle, "exposure_time_control"),
            Some(DeviceMode::ExposureTimeControl(ControlMode::Manual))
        );
    }

    #[test]
    fn test_geometry_failure_stops_before_toggles() {
        let params = CameraParameters {
            offset_x: 5000,
            ..CameraParameters::default()
        };
        let (sdk, handle, caps) = open(SimulatedCamera::color_usb3());

        let err = apply_parameters(&sdk, handle, &caps, &params).unwrap_err();
        assert!(matches!(
            err,
            CameraError::ParameterOutOfRange { name: "offset_x", value, max, .. }
                if value == 5000.0 && max == 1904.0
        ));
        assert_eq!(set_params(&sdk), vec![ParamId::Width, ParamId::Height]);
        assert_eq!(sdk.count_calls(|c| matches!(c, SdkCall::SetMode(_))), 0);
    }
}

proptest! {
    /// Every in-range gain is accepted and written unchanged
    #[test]
    fn in_range_gain_is_applied(gain in 0.0f64..=24.0) {
        let (sdk, handle, caps) = open(SimulatedCamera::color_usb3());
        let params = CameraParameters { gain, ..CameraParameters::default() };

        let applied = apply_parameters(&sdk, handle, &caps, &params);
        prop_assert!(applied.is_ok(), "gain {} rejected: {:?}", gain, applied.err());
        prop_assert_eq!(sdk.param_value(handle, ParamId::Gain), Some(ParamValue::Float(gain)));
    }

    /// Out-of-range values report the probed bounds and are never written
    #[test]
    fn out_of_range_exposure_is_rejected(
        exposure in prop_oneof![-1.0e6f64..1.0, 1_000_000.5f64..1.0e9],
    ) {
        let (sdk, handle, caps) = open(SimulatedCamera::color_usb3());
        let params = CameraParameters { exposure_time: exposure, ..CameraParameters::default() };

        match apply_parameters(&sdk, handle, &caps, &params) {
            Err(CameraError::ParameterOutOfRange { name, value, min, max }) => {
                prop_assert_eq!(name, "exposure_time");
                prop_assert_eq!(value, exposure);
                prop_assert_eq!((min, max), (1.0, 1_000_000.0));
            }
            other => prop_assert!(false, "unexpected result {:?}", other),
        }
        prop_assert!(!set_params(&sdk).contains(&ParamId::ExposureTime));
    }

    /// Applied geometry always lands on the device grid inside the range
    #[test]
    fn width_snaps_inside_range(width in 16u32..=1920) {
        let (sdk, handle, caps) = open(SimulatedCamera::color_usb3());
        let params = CameraParameters { width, ..CameraParameters::default() };
        apply_parameters(&sdk, handle, &caps, &params).unwrap();

        let actual = sdk.get_param(handle, ParamId::Width).unwrap().as_f64() as u32;
        prop_assert!((16..=1920).contains(&actual));
        prop_assert_eq!((actual - 16) % 16, 0);
        prop_assert!(actual <= width && width - actual < 16);
    }

    /// Unsupported parameters never fail, whatever value is requested
    #[test]
    fn unsupported_parameters_ignore_value(saturation in any::<f64>(), hue in any::<f64>()) {
        let (sdk, handle, caps) = open(SimulatedCamera::mono_usb3());
        let params = CameraParameters { saturation, hue, ..CameraParameters::default() };

        let applied = apply_parameters(&sdk, handle, &caps, &params).unwrap();
        prop_assert!(applied.skipped.contains(&ParamId::Saturation));
        prop_assert!(applied.skipped.contains(&ParamId::Hue));
    }
}
