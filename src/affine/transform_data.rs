//! Affine Transform Data - Pure DOP
//!
//! Authoring-time instructions and the compiled matrices built from them.
//! All transformations happen in transform_operations.rs

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// A compiled affine transform (column-major, applied to column vectors)
pub type AffineTransform = Mat4;

/// Six primitive channels of one IFS map
///
/// `rotate` holds Euler angles in degrees, applied as Y · X · Z.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformInstructions {
    pub scale: Vec3,
    pub shear_x: Vec3,
    pub shear_y: Vec3,
    pub shear_z: Vec3,
    pub rotate: Vec3,
    pub translate: Vec3,
}

impl Default for TransformInstructions {
    fn default() -> Self {
        Self {
            scale: Vec3::ONE,
            shear_x: Vec3::ZERO,
            shear_y: Vec3::ZERO,
            shear_z: Vec3::ZERO,
            rotate: Vec3::ZERO,
            translate: Vec3::ZERO,
        }
    }
}

impl TransformInstructions {
    /// Uniform contraction towards `translate`, the common Sierpinski-style map
    pub fn uniform(scale: f32, translate: Vec3) -> Self {
        Self {
            scale: Vec3::splat(scale),
            translate,
            ..Self::default()
        }
    }
}

/// How the rotation channel is blended by `interpolate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RotationInterpolation {
    /// Quaternion slerp, always the shortest arc
    #[default]
    Slerp,
    /// Component-wise Euler lerp, kept for comparison only
    LinearEuler,
}

/// Ordered set of compiled transforms
///
/// Index order matches the authored instruction order and is the "choice"
/// dimension used during generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformSet {
    pub transforms: Vec<AffineTransform>,
}

impl TransformSet {
    pub fn from_matrices(transforms: Vec<AffineTransform>) -> Self {
        Self { transforms }
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn as_slice(&self) -> &[AffineTransform] {
        &self.transforms
    }

    /// Transform count as the u32 the kernels consume
    pub fn count(&self) -> u32 {
        self.transforms.len() as u32
    }
}
