//! Motion sample and stroke summary value types.

use serde::{Deserialize, Serialize};

use crate::math::{Quat, Vec3};

/// One position/orientation measurement of a tracked device.
///
/// The orientation must be a unit quaternion before it is handed to the
/// engine; passing an unnormalized orientation is a caller contract
/// violation and is not corrected here.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TransformSample {
    /// Position in meters (engine-convention space).
    pub position: Vec3,
    /// Orientation as a unit quaternion.
    pub orientation: Quat,
}

impl TransformSample {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self { position, orientation }
    }
}

/// Geometric summary of a completed stroke, returned by `end_stroke`
/// regardless of whether identification succeeded, so the caller can
/// always visualize the captured path.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StrokeSummary {
    /// Centroid of the captured path.
    pub position: Vec3,
    /// Overall scale at which the stroke was performed.
    pub scale: f64,
    /// Primary axis (direction of greatest expansion).
    pub dir0: Vec3,
    /// Secondary axis.
    pub dir1: Vec3,
    /// Minor axis (direction of smallest expansion).
    pub dir2: Vec3,
}

impl StrokeSummary {
    /// The stroke's orientation as a quaternion, reconstructed from the
    /// three principal axes.
    ///
    /// Exact only if the axes are mutually orthonormal and right-handed;
    /// the engine's output is trusted, not validated.
    pub fn orientation(&self) -> Quat {
        Quat::from_axes(self.dir0, self.dir1, self.dir2)
    }

    /// Primary gesture direction in world space.
    pub fn primary_direction(&self) -> Vec3 {
        self.orientation().rotate(Vec3::X)
    }

    /// Secondary gesture direction in world space.
    pub fn secondary_direction(&self) -> Vec3 {
        self.orientation().rotate(Vec3::Y)
    }
}
