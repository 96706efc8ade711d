//! Rigid transforms: unit quaternions plus translations.

use chassis_core::config::FrameConfig;

/// Unit quaternion orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Hamilton product `self * other`.
    #[must_use]
    pub fn multiply(self, other: Self) -> Self {
        Self {
            w: self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
            x: self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            y: self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            z: self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
        }
    }

    #[must_use]
    pub fn conjugate(self) -> Self {
        Self {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    /// Renormalize to a unit quaternion; the identity when degenerate.
    #[must_use]
    pub fn normalized(self) -> Self {
        let norm = (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if norm <= f64::EPSILON {
            return Self::IDENTITY;
        }
        Self {
            w: self.w / norm,
            x: self.x / norm,
            y: self.y / norm,
            z: self.z / norm,
        }
    }

    /// Rotate a vector: `q v q⁻¹`.
    #[must_use]
    pub fn rotate(self, v: [f64; 3]) -> [f64; 3] {
        let qv = Self {
            w: 0.0,
            x: v[0],
            y: v[1],
            z: v[2],
        };
        let rotated = self.multiply(qv).multiply(self.conjugate());
        [rotated.x, rotated.y, rotated.z]
    }
}

/// A rigid transform: rotate, then translate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub translation: [f64; 3],
    pub rotation: Quaternion,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        translation: [0.0; 3],
        rotation: Quaternion::IDENTITY,
    };

    /// The static offset a frame config declares against its parent.
    #[must_use]
    pub fn from_frame_config(config: &FrameConfig) -> Self {
        let o = config.orientation;
        Self {
            translation: [config.translation.x, config.translation.y, config.translation.z],
            rotation: Quaternion {
                w: o.w,
                x: o.x,
                y: o.y,
                z: o.z,
            }
            .normalized(),
        }
    }

    /// `self ∘ child`: the pose of `child` expressed one level further up.
    #[must_use]
    pub fn compose(&self, child: &Self) -> Self {
        let rotated = self.rotation.rotate(child.translation);
        Self {
            translation: [
                self.translation[0] + rotated[0],
                self.translation[1] + rotated[1],
                self.translation[2] + rotated[2],
            ],
            rotation: self.rotation.multiply(child.rotation).normalized(),
        }
    }

    /// The transform undoing this one.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let inv_rotation = self.rotation.conjugate();
        let t = inv_rotation.rotate(self.translation);
        Self {
            translation: [-t[0], -t[1], -t[2]],
            rotation: inv_rotation,
        }
    }
}
