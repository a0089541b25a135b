//! Affine Compiler
//!
//! Turns authored transform instructions into 4x4 affine matrices and
//! interpolates between instruction sets. The compiled `TransformSet` is the
//! unit consumed by point synthesis and voxelization.

pub mod transform_data;
pub mod transform_operations;

pub use transform_data::{AffineTransform, RotationInterpolation, TransformInstructions, TransformSet};
pub use transform_operations::{
    compile, compile_transform_set, compose, euler_to_quat, interpolate, linear_determinant,
    rotation_matrix, scale_matrix, shear_x_matrix, shear_y_matrix, shear_z_matrix,
    translation_matrix,
};
