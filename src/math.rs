//! Minimal 3D math for motion samples: vectors, quaternions, and the
//! conversions the capture protocol needs.
//!
//! Components are f64 because the engine boundary works in double
//! precision.  Nothing here renormalizes silently: a non-unit quaternion
//! in produces a non-unit quaternion out.

use serde::{Deserialize, Serialize};

// ── Vector ─────────────────────────────────────────────────

/// Position or direction in 3D space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const X: Vec3 = Vec3 { x: 1.0, y: 0.0, z: 0.0 };
    pub const Y: Vec3 = Vec3 { x: 0.0, y: 1.0, z: 0.0 };
    pub const Z: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 1.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(self, factor: f64) -> Vec3 {
        Vec3::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn dot(self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(self, other: Vec3) -> f64 {
        self.sub(other).length()
    }
}

// ── Quaternion ─────────────────────────────────────────────

/// Orientation quaternion (x, y, z, w).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// Hamilton product `self * other` (apply `other`, then `self`).
    pub fn mul(self, other: Quat) -> Quat {
        Quat::new(
            self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
            self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
        )
    }

    pub fn conjugate(self) -> Quat {
        Quat::new(-self.x, -self.y, -self.z, self.w)
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// Rotate a vector by this quaternion (assumed unit length).
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let t = u.cross(v).scale(2.0);
        v.add(t.scale(self.w)).add(u.cross(t))
    }

    /// Rotation of `angle` radians about the world Y axis.
    pub fn from_y_rotation(angle: f64) -> Quat {
        let half = angle * 0.5;
        Quat::new(0.0, half.sin(), 0.0, half.cos())
    }

    /// Heading of this orientation about the world Y axis, in radians.
    ///
    /// Measured from the +Z forward direction, positive towards +X.
    pub fn yaw(self) -> f64 {
        let forward = self.rotate(Vec3::Z);
        forward.x.atan2(forward.z)
    }

    /// Reconstruct an orientation from three principal-axis vectors,
    /// treated as the columns of a rotation matrix.
    ///
    /// Uses the trace-based algorithm with four branches selected by the
    /// largest diagonal term, which stays numerically stable when the
    /// trace is small.  The result is only meaningful if the three axes
    /// are mutually orthonormal and right-handed; a left-handed or
    /// non-orthonormal triple yields an undefined quaternion.
    pub fn from_axes(dir0: Vec3, dir1: Vec3, dir2: Vec3) -> Quat {
        let tr = dir0.x + dir1.y + dir2.z;
        if tr > 0.0 {
            let s = (tr + 1.0).sqrt() * 2.0;
            Quat::new(
                (dir1.z - dir2.y) / s,
                (dir2.x - dir0.z) / s,
                (dir0.y - dir1.x) / s,
                0.25 * s,
            )
        } else if dir0.x > dir1.y && dir0.x > dir2.z {
            let s = (1.0 + dir0.x - dir1.y - dir2.z).sqrt() * 2.0;
            Quat::new(
                0.25 * s,
                (dir1.x + dir0.y) / s,
                (dir2.x + dir0.z) / s,
                (dir1.z - dir2.y) / s,
            )
        } else if dir1.y > dir2.z {
            let s = (1.0 + dir1.y - dir0.x - dir2.z).sqrt() * 2.0;
            Quat::new(
                (dir1.x + dir0.y) / s,
                0.25 * s,
                (dir2.y + dir1.z) / s,
                (dir2.x - dir0.z) / s,
            )
        } else {
            let s = (1.0 + dir2.z - dir0.x - dir1.y).sqrt() * 2.0;
            Quat::new(
                (dir2.x + dir0.z) / s,
                (dir2.y + dir1.z) / s,
                0.25 * s,
                (dir0.y - dir1.x) / s,
            )
        }
    }

    /// Build an orientation from Euler angles (radians) applied in the
    /// given rotation order.  The order names the application sequence:
    /// `Xyz` applies the X rotation first, then Y, then Z.
    pub fn from_euler(order: RotationOrder, x: f64, y: f64, z: f64) -> Quat {
        let qx = Quat::new((x * 0.5).sin(), 0.0, 0.0, (x * 0.5).cos());
        let qy = Quat::new(0.0, (y * 0.5).sin(), 0.0, (y * 0.5).cos());
        let qz = Quat::new(0.0, 0.0, (z * 0.5).sin(), (z * 0.5).cos());
        match order {
            RotationOrder::Xyz => qz.mul(qy).mul(qx),
            RotationOrder::Xzy => qy.mul(qz).mul(qx),
            RotationOrder::Yxz => qz.mul(qx).mul(qy),
            RotationOrder::Yzx => qx.mul(qz).mul(qy),
            RotationOrder::Zxy => qy.mul(qx).mul(qz),
            RotationOrder::Zyx => qx.mul(qy).mul(qz),
        }
    }
}

// ── Rotation order ─────────────────────────────────────────

/// Order in which per-axis Euler rotations are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RotationOrder {
    Xyz,
    Xzy,
    /// Y first, the convention most game engines default to.
    #[default]
    Yxz,
    Yzx,
    Zxy,
    Zyx,
}

/// Decompose a 4x4 column-major transform (translation in the `m[3]`
/// sub-array) into position and orientation.
pub fn decompose_transform(m: &[[f64; 4]; 4]) -> (Vec3, Quat) {
    let position = Vec3::new(m[3][0], m[3][1], m[3][2]);
    let dir0 = Vec3::new(m[0][0], m[0][1], m[0][2]);
    let dir1 = Vec3::new(m[1][0], m[1][1], m[1][2]);
    let dir2 = Vec3::new(m[2][0], m[2][1], m[2][2]);
    (position, Quat::from_axes(dir0, dir1, dir2))
}
