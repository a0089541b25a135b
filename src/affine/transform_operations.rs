//! Affine Transform Operations - Pure DOP Functions
//!
//! All functions are pure: take instructions, return matrices.
//! Composition order is fixed: translate · rotation · (shearZ · shearY · shearX) · scale.

use super::transform_data::{AffineTransform, RotationInterpolation, TransformInstructions, TransformSet};
use glam::{Mat3, Mat4, Quat, Vec3, Vec4};

/// Build a matrix from three authored rows (the fourth row is 0, 0, 0, 1)
fn from_rows(r0: Vec4, r1: Vec4, r2: Vec4) -> Mat4 {
    Mat4::from_cols(r0, r1, r2, Vec4::W).transpose()
}

/// Non-uniform scale
pub fn scale_matrix(s: Vec3) -> Mat4 {
    Mat4::from_scale(s)
}

/// Shear of x by y (`s.y`) and z (`s.z`); `s.x` is ignored
pub fn shear_x_matrix(s: Vec3) -> Mat4 {
    from_rows(
        Vec4::new(1.0, s.y, s.z, 0.0),
        Vec4::new(0.0, 1.0, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
    )
}

/// Shear of y by x (`s.x`) and z (`s.z`); `s.y` is ignored
pub fn shear_y_matrix(s: Vec3) -> Mat4 {
    from_rows(
        Vec4::new(1.0, 0.0, 0.0, 0.0),
        Vec4::new(s.x, 1.0, s.z, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
    )
}

/// Shear of z by x (`s.x`) and y (`s.y`); `s.z` is ignored
pub fn shear_z_matrix(s: Vec3) -> Mat4 {
    from_rows(
        Vec4::new(1.0, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 1.0, 0.0, 0.0),
        Vec4::new(s.x, s.y, 1.0, 0.0),
    )
}

pub fn translation_matrix(t: Vec3) -> Mat4 {
    Mat4::from_translation(t)
}

/// Euler angles in degrees to a quaternion, applied as rotateY · rotateX · rotateZ
pub fn euler_to_quat(degrees: Vec3) -> Quat {
    let r = degrees * std::f32::consts::PI / 180.0;
    Quat::from_rotation_y(r.y) * Quat::from_rotation_x(r.x) * Quat::from_rotation_z(r.z)
}

/// Euler angles in degrees to a rotation matrix (rotateY · rotateX · rotateZ)
pub fn rotation_matrix(degrees: Vec3) -> Mat4 {
    let r = degrees * std::f32::consts::PI / 180.0;
    Mat4::from_rotation_y(r.y) * Mat4::from_rotation_x(r.x) * Mat4::from_rotation_z(r.z)
}

/// Compose the six channels with the rotation already in quaternion form
pub fn compose(
    scale: Vec3,
    shear_x: Vec3,
    shear_y: Vec3,
    shear_z: Vec3,
    rotation: Quat,
    translate: Vec3,
) -> AffineTransform {
    let shear = shear_z_matrix(shear_z) * shear_y_matrix(shear_y) * shear_x_matrix(shear_x);
    translation_matrix(translate) * Mat4::from_quat(rotation) * shear * scale_matrix(scale)
}

/// Compile one instruction set into its affine matrix
///
/// Never fails. A zero scale yields a singular matrix; keeping the upper 3x3
/// invertible is the caller's job.
pub fn compile(instructions: &TransformInstructions) -> AffineTransform {
    compose(
        instructions.scale,
        instructions.shear_x,
        instructions.shear_y,
        instructions.shear_z,
        euler_to_quat(instructions.rotate),
        instructions.translate,
    )
}

/// Blend two instruction sets and compile the result
///
/// Scale, shear and translate are lerped. `t` is not clamped.
pub fn interpolate(
    a: &TransformInstructions,
    b: &TransformInstructions,
    t: f32,
    mode: RotationInterpolation,
) -> AffineTransform {
    let rotation = match mode {
        RotationInterpolation::Slerp => {
            let qa = euler_to_quat(a.rotate);
            let mut qb = euler_to_quat(b.rotate);
            // q and -q are the same rotation; pick the one on qa's hemisphere
            if qa.dot(qb) < 0.0 {
                qb = -qb;
            }
            qa.slerp(qb, t)
        }
        RotationInterpolation::LinearEuler => euler_to_quat(a.rotate.lerp(b.rotate, t)),
    };

    compose(
        a.scale.lerp(b.scale, t),
        a.shear_x.lerp(b.shear_x, t),
        a.shear_y.lerp(b.shear_y, t),
        a.shear_z.lerp(b.shear_z, t),
        rotation,
        a.translate.lerp(b.translate, t),
    )
}

/// Determinant of the upper-left 3x3 block
pub fn linear_determinant(transform: &AffineTransform) -> f32 {
    Mat3::from_mat4(*transform).determinant()
}

/// Compile every instruction set, preserving order
pub fn compile_transform_set(instructions: &[TransformInstructions]) -> TransformSet {
    let transforms: Vec<AffineTransform> = instructions.iter().map(compile).collect();

    for (index, transform) in transforms.iter().enumerate() {
        if linear_determinant(transform).abs() <= f32::EPSILON {
            log::warn!(
                "[AffineCompiler] Transform {} is singular; the system is not a valid contraction",
                index
            );
        }
    }

    log::debug!("[AffineCompiler] Compiled {} transforms", transforms.len());
    TransformSet::from_matrices(transforms)
}
