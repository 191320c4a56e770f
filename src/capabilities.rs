//! Capability probing.
//!
//! Right after a camera is opened every parameter in
//! [`crate::controls::PARAMETERS`] gets a range query. Models differ in what
//! they implement, so a failed query of an optional parameter only marks it
//! unsupported. Geometry is mandatory.

use crate::controls::PARAMETERS;
use crate::errors::{CameraError, Result};
use crate::platform::{CameraSdk, DeviceHandle, ParamId};
use crate::types::ParameterRange;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Parameters whose range query succeeded on the opened camera.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupportedFeatures(BTreeSet<ParamId>);

impl SupportedFeatures {
    pub fn contains(&self, param: ParamId) -> bool {
        self.0.contains(&param)
    }

    pub fn iter(&self) -> impl Iterator<Item = ParamId> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Probed ranges of one opened camera. Immutable until the camera is
/// re-initialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraCapabilities {
    ranges: BTreeMap<ParamId, ParameterRange>,
    features: SupportedFeatures,
}

impl CameraCapabilities {
    /// Query the range of every known parameter on `handle`.
    pub fn probe(sdk: &dyn CameraSdk, handle: DeviceHandle) -> Result<Self> {
        let mut ranges = BTreeMap::new();

        for spec in PARAMETERS {
            match sdk.get_range(handle, spec.id) {
                Ok(range) => {
                    log::debug!("{} range: {}", spec.id, range);
                    ranges.insert(spec.id, range);
                }
                Err(e) if spec.mandatory => {
                    return Err(CameraError::device(format!("get_range({})", spec.id), e));
                }
                Err(e) => {
                    log::debug!("{} not supported by this camera: {}", spec.id, e);
                }
            }
        }

        Ok(Self::from_ranges(ranges))
    }

    /// Build capabilities from already known ranges.
    pub fn from_ranges(ranges: BTreeMap<ParamId, ParameterRange>) -> Self {
        let features = SupportedFeatures(ranges.keys().copied().collect());
        Self { ranges, features }
    }

    pub fn range(&self, param: ParamId) -> Option<&ParameterRange> {
        self.ranges.get(&param)
    }

    pub fn is_supported(&self, param: ParamId) -> bool {
        self.features.contains(param)
    }

    pub fn features(&self) -> &SupportedFeatures {
        &self.features
    }

    pub fn ranges(&self) -> impl Iterator<Item = (ParamId, &ParameterRange)> {
        self.ranges.iter().map(|(id, range)| (*id, range))
    }
}

impl fmt::Display for CameraCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Supported parameters:")?;
        for (id, range) in &self.ranges {
            write!(f, "\n  {}: {}", id, range)?;
        }
        Ok(())
    }
}
