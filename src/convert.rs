//! Coordinate-convention conversion for motion samples.
//!
//! Different XR runtimes (and the engine's own database format) disagree
//! on axis orientation and handedness.  Every sample is converted from
//! the runtime's convention to the engine's convention before capture,
//! and engine output is converted back.  Head/HMD samples use a separate
//! fixed transform from hand/controller samples because some runtimes
//! report head pose in a different convention than controller pose.
//!
//! All conversions are pure axis permutations / fixed quaternion factors;
//! nothing here renormalizes the input orientation.

use crate::math::{Quat, Vec3};
use crate::sample::TransformSample;

/// Which XR runtime produced the raw device transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XrPlugin {
    #[default]
    OpenXr,
    OculusVr,
    SteamVr,
}

impl XrPlugin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenXr => "openxr",
            Self::OculusVr => "oculusvr",
            Self::SteamVr => "steamvr",
        }
    }
}

/// Which convention the engine uses internally (i.e. which convention
/// the gesture database file was created with).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinateSystem {
    #[default]
    OpenXr,
    OculusVr,
    SteamVr,
    UnrealEngine,
}

impl CoordinateSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenXr => "openxr",
            Self::OculusVr => "oculusvr",
            Self::SteamVr => "steamvr",
            Self::UnrealEngine => "unreal-engine",
        }
    }
}

const SQRT_HALF: f64 = std::f64::consts::FRAC_1_SQRT_2;

// Fixed basis-change factors.  HALF_TURN_* rotate the controller grip
// between the OpenXR/SteamVR and OculusVR aim conventions; the AXIS_CYCLE
// pair permutes the right-handed meter space into Unreal's left-handed
// centimeter space.
const HALF_TURN_POS_X: Quat = Quat { x: SQRT_HALF, y: 0.0, z: 0.0, w: SQRT_HALF };
const HALF_TURN_NEG_X: Quat = Quat { x: -SQRT_HALF, y: 0.0, z: 0.0, w: SQRT_HALF };
const AXIS_CYCLE: Quat = Quat { x: 0.5, y: 0.5, z: 0.5, w: 0.5 };
const AXIS_CYCLE_INV: Quat = Quat { x: -0.5, y: -0.5, z: -0.5, w: 0.5 };
const UNREAL_GRIP: Quat = Quat { x: 0.0, y: 0.0, z: -SQRT_HALF, w: SQRT_HALF };

/// Meters to Unreal centimeters, with the axis permutation.
fn position_to_unreal(p: Vec3) -> Vec3 {
    Vec3::new(p.z, p.x, p.y).scale(100.0)
}

/// Unreal centimeters back to meters.
fn position_from_unreal(p: Vec3) -> Vec3 {
    Vec3::new(p.y, p.z, p.x).scale(0.01)
}

/// Convert a hand/controller sample from the runtime's convention to the
/// engine's convention.  Same-convention conversion is the identity.
pub fn convert_hand_sample(
    plugin: XrPlugin,
    system: CoordinateSystem,
    sample: TransformSample,
) -> TransformSample {
    let TransformSample { position: p, orientation: q } = sample;
    let (p, q) = match (plugin, system) {
        (XrPlugin::OpenXr | XrPlugin::SteamVr, CoordinateSystem::OculusVr) => {
            (p, q.mul(HALF_TURN_POS_X))
        }
        (XrPlugin::OpenXr | XrPlugin::SteamVr, CoordinateSystem::UnrealEngine) => {
            (position_to_unreal(p), AXIS_CYCLE.mul(q).mul(UNREAL_GRIP))
        }
        (XrPlugin::OculusVr, CoordinateSystem::OpenXr | CoordinateSystem::SteamVr) => {
            (p, q.mul(HALF_TURN_NEG_X))
        }
        (XrPlugin::OculusVr, CoordinateSystem::UnrealEngine) => {
            (position_to_unreal(p), AXIS_CYCLE.mul(q).mul(AXIS_CYCLE_INV))
        }
        _ => (p, q),
    };
    TransformSample::new(p, q)
}

/// Convert a head/HMD sample to the engine's convention.
///
/// Head pose is convention-identical across the supported runtimes, so
/// only the engine-side convention matters here.
pub fn convert_head_sample(system: CoordinateSystem, sample: TransformSample) -> TransformSample {
    match system {
        CoordinateSystem::UnrealEngine => TransformSample::new(
            position_to_unreal(sample.position),
            AXIS_CYCLE.mul(sample.orientation).mul(AXIS_CYCLE_INV),
        ),
        _ => sample,
    }
}

/// Convert engine output (stroke position/orientation) back from the
/// engine's convention to the runtime's convention.
pub fn convert_output_sample(system: CoordinateSystem, sample: TransformSample) -> TransformSample {
    match system {
        CoordinateSystem::UnrealEngine => TransformSample::new(
            position_from_unreal(sample.position),
            AXIS_CYCLE_INV.mul(sample.orientation),
        ),
        _ => sample,
    }
}
