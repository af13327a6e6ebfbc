use nalgebra as na;
use na::{vector, Matrix4, Vector2, Vector3, Vector4};

pub type Vector2f = Vector2<f64>;
pub type Vector3f = Vector3<f64>;
pub type Vector4f = Vector4<f64>;
pub type Vector2i = Vector2<i32>;
pub type Vector3i = Vector3<i32>;
pub type Matrix4f = Matrix4<f64>;

/// Transformation of a point to homogenous coordinates, padding with 1.0.
pub fn embed(v: Vector3f) -> Vector4f {
    return vector![v.x, v.y, v.z, 1.0];
}

/// Drops the w component. No division happens here, callers divide by w themselves when they need to.
pub fn proj(v: Vector4f) -> Vector3f {
    return vector![v.x, v.y, v.z];
}

/// Rounds to the nearest integer coordinate.
pub fn to_vector2i(v: Vector2f) -> Vector2i {
    return vector![v.x.round() as i32, v.y.round() as i32];
}

pub fn to_vector3i(v: Vector3f) -> Vector3i {
    return vector![v.x.round() as i32, v.y.round() as i32, v.z.round() as i32];
}

pub fn to_vector2f(v: Vector2i) -> Vector2f {
    return v.cast::<f64>();
}

pub fn to_vector3f(v: Vector3i) -> Vector3f {
    return v.cast::<f64>();
}

/// Inverse of the transposed matrix, used to carry normals through a transform.
/// None if the matrix is singular.
pub fn invert_transpose(m: &Matrix4f) -> Option<Matrix4f> {
    return m.transpose().try_inverse();
}
