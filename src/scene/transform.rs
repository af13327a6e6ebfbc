use thiserror::Error;

use crate::util::{Matrix4f, Vector3f};

#[derive(Error, Debug, PartialEq)]
pub enum TransformError {
    /// Camera placed on its target or up vector parallel to the view direction.
    #[error("Camera basis is degenerate")]
    DegenerateBasis,
}

/// Matrices that carry model coordinates to the frame buffer. Set once per render pass and
/// handed to every vertex shader call of that pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub model_view: Matrix4f,
    pub projection: Matrix4f,
    pub viewport: Matrix4f,
}

impl Default for Transform {
    fn default() -> Self {
        return Transform {
            model_view: Matrix4f::identity(),
            projection: Matrix4f::identity(),
            viewport: Matrix4f::identity(),
        };
    }
}

impl Transform {
    /// Places the camera at `eye` looking at `center`. The matrix is left untouched on error.
    pub fn look_at(&mut self, eye: Vector3f, center: Vector3f, up: Vector3f) -> Result<(), TransformError> {
        self.model_view = lookat(eye, center, up)?;
        return Ok(());
    }

    pub fn set_projection(&mut self, coef: f64) {
        self.projection = projection(coef);
    }

    pub fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32, max_depth: f64) {
        self.viewport = viewport(x, y, width, height, max_depth);
    }

    /// Full model to frame-buffer transform.
    pub fn mvp(&self) -> Matrix4f {
        return self.viewport * self.projection * self.model_view;
    }

    /// Applied to light direction, its invert-transpose to normals.
    pub fn projection_model_view(&self) -> Matrix4f {
        return self.projection * self.model_view;
    }
}

/// Camera frame: z points from the target to the eye, x = up × z, y = z × x.
/// Rows hold the basis, the last column moves `center` to the origin.
pub fn lookat(eye: Vector3f, center: Vector3f, up: Vector3f) -> Result<Matrix4f, TransformError> {
    let z = (eye - center)
        .try_normalize(f64::EPSILON)
        .ok_or(TransformError::DegenerateBasis)?;
    let x = up
        .cross(&z)
        .try_normalize(f64::EPSILON)
        .ok_or(TransformError::DegenerateBasis)?;
    let y = z.cross(&x).normalize();

    let mut model_view = Matrix4f::identity();
    for i in 0..3 {
        model_view[(0, i)] = x[i];
        model_view[(1, i)] = y[i];
        model_view[(2, i)] = z[i];
        model_view[(i, 3)] = -center[i];
    }
    return Ok(model_view);
}

/// 0.0 gives an orthographic projection, -1/distance a perspective one for a camera at that distance.
pub fn projection(coef: f64) -> Matrix4f {
    let mut projection = Matrix4f::identity();
    projection[(3, 2)] = coef;
    return projection;
}

/// Maps [-1, 1] cube onto the pixel rectangle and depth onto [0, max_depth].
pub fn viewport(x: i32, y: i32, width: u32, height: u32, max_depth: f64) -> Matrix4f {
    let w = width as f64;
    let h = height as f64;
    let mut viewport = Matrix4f::identity();
    viewport[(0, 3)] = x as f64 + w / 2.0;
    viewport[(1, 3)] = y as f64 + h / 2.0;
    viewport[(2, 3)] = max_depth / 2.0;
    viewport[(0, 0)] = w / 2.0;
    viewport[(1, 1)] = h / 2.0;
    viewport[(2, 2)] = max_depth / 2.0;
    return viewport;
}
