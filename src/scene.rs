//! Triangle setup and scan conversion. Shaders compute positions and colors, this module decides
//! which pixels a triangle covers and keeps the depth buffer up to date.

pub mod model;
pub mod shader;
pub mod transform;

use nalgebra::vector;

use crate::image::{Color, Image};
use crate::util::{proj, to_vector2f, to_vector2i, Vector2f, Vector2i, Vector3f, Vector4f};
use shader::Shader;
use transform::Transform;

/// Pixel rectangle, both corners included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min: Vector2i,
    pub max: Vector2i,
}

/// Screen-space triangle ready for rasterization.
///
/// Setup reads x and y of the homogeneous points as they are, without dividing by w.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    points: [Vector4f; 3],
    edge_1: Vector3f,
    edge_2: Vector3f,
    determinant: f64,
    bounding_box: BoundingBox,
    perspective: bool,
}

impl Triangle {
    /// Bounding box is clamped to the image, using its height as the upper limit of both axes.
    pub fn new(points: [Vector4f; 3], image: &Image) -> Triangle {
        let origin = proj(points[0]);
        let edge_1 = proj(points[1]) - origin;
        let edge_2 = proj(points[2]) - origin;
        let determinant = edge_1.x * edge_2.y - edge_1.y * edge_2.x;

        let limit = image.height() as i32 - 1;
        let xs = points.map(|p| p.x as i32);
        let ys = points.map(|p| p.y as i32);
        let lowest = |values: [i32; 3]| values.iter().copied().fold(i32::MAX, i32::min).max(0);
        let highest = |values: [i32; 3]| values.iter().copied().fold(i32::MIN, i32::max).min(limit);
        let bounding_box = BoundingBox {
            min: vector![lowest(xs), lowest(ys)],
            max: vector![highest(xs), highest(ys)],
        };

        return Triangle {
            points,
            edge_1,
            edge_2,
            determinant,
            bounding_box,
            perspective: false,
        };
    }

    /// Passes perspective corrected weights to the fragment stage instead of screen-space ones.
    pub fn with_perspective_correction(mut self, enabled: bool) -> Triangle {
        self.perspective = enabled;
        return self;
    }

    pub fn bounding_box(&self) -> BoundingBox {
        return self.bounding_box;
    }

    /// Weights of the three vertices at a screen point. A degenerate triangle answers (-1, -1, -1)
    /// for every point, so nothing of it ever gets drawn.
    pub fn barycentric(&self, point: Vector2f) -> Vector3f {
        if self.determinant == 0.0 {
            return vector![-1.0, -1.0, -1.0];
        }
        let d = point - proj(self.points[0]).xy();
        let lambda_1 = (d.x * self.edge_2.y - d.y * self.edge_2.x) / self.determinant;
        let lambda_2 = (self.edge_1.x * d.y - self.edge_1.y * d.x) / self.determinant;
        return vector![1.0 - lambda_1 - lambda_2, lambda_1, lambda_2];
    }

    /// Screen-space weights divided by each vertex w and renormalized.
    pub fn perspective_correct(&self, bar: Vector3f) -> Vector3f {
        let weighted = vector![
            bar.x / self.points[0].w,
            bar.y / self.points[1].w,
            bar.z / self.points[2].w
        ];
        let sum = weighted.sum();
        if sum == 0.0 || !sum.is_finite() {
            return bar;
        }
        return weighted / sum;
    }

    /// Fills the triangle. A pixel is shaded when all its weights are non-negative and the stored
    /// depth is not greater than the interpolated one; surviving fragments write both buffers.
    pub fn draw<S: Shader + ?Sized>(&self, zbuffer: &mut Image, image: &mut Image, shader: &S) {
        let depths = vector![self.points[0].z, self.points[1].z, self.points[2].z];
        let mut color = Color::default();
        for x in self.bounding_box.min.x..=self.bounding_box.max.x {
            for y in self.bounding_box.min.y..=self.bounding_box.max.y {
                let bar = self.barycentric(to_vector2f(vector![x, y]));
                if bar.x < 0.0 || bar.y < 0.0 || bar.z < 0.0 {
                    continue;
                }
                let depth = depths.dot(&bar);
                if zbuffer.get(x, y).bgra[0] as f64 > depth {
                    continue;
                }
                let weights = if self.perspective { self.perspective_correct(bar) } else { bar };
                if shader.fragment(weights, &mut color) {
                    continue;
                }
                zbuffer.set(x, y, Color::gray(depth as u8));
                image.set(x, y, color);
            }
        }
    }

    /// Debug helper, draws the edges.
    pub fn draw_outline(&self, image: &mut Image, color: Color) {
        let corners = self.points.map(|p| to_vector2i(proj(p).xy()));
        for i in 0..3 {
            image.draw_line(corners[i], corners[(i + 1) % 3], color);
        }
    }

    /// Debug helper, draws the clamped bounding box.
    pub fn draw_bounding_box(&self, image: &mut Image, color: Color) {
        let BoundingBox { min, max } = self.bounding_box;
        let corners = [min, vector![max.x, min.y], max, vector![min.x, max.y]];
        for i in 0..4 {
            image.draw_line(corners[i], corners[(i + 1) % 4], color);
        }
    }
}

/// Runs the vertex stage for every face and rasterizes the result.
pub fn draw_model<S: Shader + ?Sized>(
    shader: &mut S,
    transform: &Transform,
    nfaces: usize,
    zbuffer: &mut Image,
    image: &mut Image,
    perspective: bool,
) {
    for iface in 0..nfaces {
        let points = [0, 1, 2].map(|nthvert| shader.vertex(transform, iface, nthvert));
        Triangle::new(points, image)
            .with_perspective_correction(perspective)
            .draw(zbuffer, image, shader);
    }
}
