//! Programmable stages of the pipeline. Every shader owns its varyings (written column by column
//! by `vertex`, read by `fragment`) and its uniforms (fixed for a whole draw call).

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use na::{vector, Matrix2x3, Matrix3, Rotation3, Vector3};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::Model;
use super::transform::Transform;
use crate::image::{Color, Image, BLACK, WHITE};
use crate::util::{embed, invert_transpose, proj, Matrix4f, Vector2f, Vector3f, Vector4f};

const DIFFUSE_WEIGHT: f64 = 0.6;
const SPECULAR_WEIGHT: f64 = 0.1;
/// Diffuse and specular light left in occluded fragments.
const SHADOW_FACTOR: f64 = 0.1;
/// Subtracted from shadow buffer values to fight z-fighting.
const SHADOW_BIAS: f64 = 1.0;
pub const KERNEL_SIZE: usize = 32;

/// Vertex and fragment parts of a shader.
pub trait Shader {
    /// Transforms vertex `nthvert` (0, 1 or 2) of face `iface` to clip space and stores its varyings.
    /// Called for all three vertices before any fragment of the face.
    fn vertex(&mut self, transform: &Transform, iface: usize, nthvert: usize) -> Vector4f;

    /// Shades a fragment given its barycentric coordinates. Returns true to discard it.
    fn fragment(&self, bar: Vector3f, color: &mut Color) -> bool;
}

#[derive(Error, Debug, PartialEq)]
#[error("Unknown shader '{0}', expected one of flat, texture, phong, shadow, occlusion, depth, empty")]
pub struct ParseShaderKindError(String);

/// Names of the available shaders, used to pick the lit pass shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ShaderKind {
    Flat,
    Texture,
    Phong,
    Shadow,
    Occlusion,
    Depth,
    Empty,
}

impl FromStr for ShaderKind {
    type Err = ParseShaderKindError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        return match name {
            "flat" => Ok(ShaderKind::Flat),
            "texture" => Ok(ShaderKind::Texture),
            "phong" => Ok(ShaderKind::Phong),
            "shadow" => Ok(ShaderKind::Shadow),
            "occlusion" => Ok(ShaderKind::Occlusion),
            "depth" => Ok(ShaderKind::Depth),
            "empty" => Ok(ShaderKind::Empty),
            _ => Err(ParseShaderKindError(name.to_string())),
        };
    }
}

impl TryFrom<String> for ShaderKind {
    type Error = ParseShaderKindError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        return name.parse();
    }
}

impl From<ShaderKind> for String {
    fn from(kind: ShaderKind) -> String {
        return kind.to_string();
    }
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShaderKind::Flat => "flat",
            ShaderKind::Texture => "texture",
            ShaderKind::Phong => "phong",
            ShaderKind::Shadow => "shadow",
            ShaderKind::Occlusion => "occlusion",
            ShaderKind::Depth => "depth",
            ShaderKind::Empty => "empty",
        };
        return write!(f, "{}", name);
    }
}

/// Boilerplate shared by every vertex shader: model position to clip space.
fn clip_position(transform: &Transform, model: &Model, iface: usize, nthvert: usize) -> Vector4f {
    return transform.mvp() * embed(model.face_vert(iface, nthvert));
}

/// Clip position after the perspective divide, as stored in `varying_tri`.
fn screen_position(clip: Vector4f) -> Vector3f {
    return proj(clip / clip.w);
}

fn normalize_or_zero(v: Vector3f) -> Vector3f {
    return v.try_normalize(f64::EPSILON).unwrap_or_else(Vector3f::zeros);
}

pub fn rotation_y(theta: f64) -> Matrix3<f64> {
    return Rotation3::from_axis_angle(&Vector3::y_axis(), theta).into_inner();
}

pub fn rotation_z(theta: f64) -> Matrix3<f64> {
    return Rotation3::from_axis_angle(&Vector3::z_axis(), theta).into_inner();
}

/// Deterministic sample offsets in the +z unit hemisphere, spread along a golden-angle spiral and
/// packed closer to the origin, so near geometry weighs more.
pub fn hemisphere_kernel(size: usize) -> Vec<Vector3f> {
    let golden_angle = PI * (3.0 - 5f64.sqrt());
    return (0..size)
        .map(|i| {
            let t = (i as f64 + 0.5) / size as f64;
            let z = 1.0 - t;
            let r = (1.0 - z * z).sqrt();
            let phi = golden_angle * i as f64;
            let scale = 0.1 + 0.9 * t * t;
            vector![r * phi.cos(), r * phi.sin(), z] * scale
        })
        .collect();
}

/// Intensity from the interpolated dot product of vertex normals and the light direction.
pub struct FlatShader<'a> {
    model: &'a Model,
    light_direction: Vector3f,
    varying_intensity: Vector3f,
}

impl<'a> FlatShader<'a> {
    pub fn new(model: &'a Model, light_direction: Vector3f) -> Self {
        return Self {
            model,
            light_direction,
            varying_intensity: Vector3f::zeros(),
        };
    }
}

impl<'a> Shader for FlatShader<'a> {
    fn vertex(&mut self, transform: &Transform, iface: usize, nthvert: usize) -> Vector4f {
        self.varying_intensity[nthvert] = self.model.norm(iface, nthvert).dot(&self.light_direction);
        return clip_position(transform, self.model, iface, nthvert);
    }

    fn fragment(&self, bar: Vector3f, color: &mut Color) -> bool {
        let intensity = self.varying_intensity.dot(&bar);
        *color = WHITE * intensity;
        return false;
    }
}

/// Same intensity as the flat shader, applied to the diffuse texture.
pub struct TextureShader<'a> {
    model: &'a Model,
    light_direction: Vector3f,
    varying_intensity: Vector3f,
    varying_uv: Matrix2x3<f64>,
}

impl<'a> TextureShader<'a> {
    pub fn new(model: &'a Model, light_direction: Vector3f) -> Self {
        return Self {
            model,
            light_direction,
            varying_intensity: Vector3f::zeros(),
            varying_uv: Matrix2x3::zeros(),
        };
    }
}

impl<'a> Shader for TextureShader<'a> {
    fn vertex(&mut self, transform: &Transform, iface: usize, nthvert: usize) -> Vector4f {
        self.varying_uv.set_column(nthvert, &self.model.uv(iface, nthvert));
        self.varying_intensity[nthvert] = self.model.norm(iface, nthvert).dot(&self.light_direction);
        return clip_position(transform, self.model, iface, nthvert);
    }

    fn fragment(&self, bar: Vector3f, color: &mut Color) -> bool {
        let intensity = self.varying_intensity.dot(&bar);
        *color = self.model.diffuse(self.varying_uv * bar) * intensity;
        return false;
    }
}

/// Uniforms of the Phong lighting model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lighting {
    pub light_direction: Vector3f,
    pub ambient: f64,
    /// Projection * model-view, applied to the light direction.
    pub uniform_m: Matrix4f,
    /// Invert-transpose of `uniform_m`, applied to normals.
    pub uniform_mit: Matrix4f,
}

impl Lighting {
    /// Lighting for the pass the transform is set up for. None if the transform is singular.
    pub fn new(transform: &Transform, light_direction: Vector3f, ambient: f64) -> Option<Self> {
        let uniform_m = transform.projection_model_view();
        let uniform_mit = invert_transpose(&uniform_m)?;
        return Some(Self {
            light_direction,
            ambient,
            uniform_m,
            uniform_mit,
        });
    }

    /// Diffuse and specular terms at a texture coordinate, normal taken from the normal map.
    fn diffuse_specular(&self, model: &Model, uv: Vector2f) -> (f64, f64) {
        let normal = normalize_or_zero(proj(self.uniform_mit * embed(model.normal_map(uv))));
        let light = normalize_or_zero(proj(self.uniform_m * embed(self.light_direction)));
        let reflected = normalize_or_zero(2.0 * light.dot(&normal) * normal - light);

        let diffuse = (-light.dot(&normal)).max(0.0);
        let specular = (-reflected.dot(&self.light_direction))
            .max(0.0)
            .powf(model.specular(uv));
        return (diffuse, specular);
    }

    /// Ambient term plus the diffuse and specular terms scaled by `shadow`.
    fn intensity(&self, model: &Model, uv: Vector2f, shadow: f64) -> f64 {
        let (diffuse, specular) = self.diffuse_specular(model, uv);
        return self.ambient + shadow * (DIFFUSE_WEIGHT * diffuse + SPECULAR_WEIGHT * specular);
    }
}

/// Per-fragment normals from the normal map with a specular highlight.
pub struct PhongShader<'a> {
    model: &'a Model,
    lighting: Lighting,
    varying_uv: Matrix2x3<f64>,
}

impl<'a> PhongShader<'a> {
    pub fn new(model: &'a Model, lighting: Lighting) -> Self {
        return Self {
            model,
            lighting,
            varying_uv: Matrix2x3::zeros(),
        };
    }
}

impl<'a> Shader for PhongShader<'a> {
    fn vertex(&mut self, transform: &Transform, iface: usize, nthvert: usize) -> Vector4f {
        self.varying_uv.set_column(nthvert, &self.model.uv(iface, nthvert));
        return clip_position(transform, self.model, iface, nthvert);
    }

    fn fragment(&self, bar: Vector3f, color: &mut Color) -> bool {
        let uv = self.varying_uv * bar;
        let intensity = self.lighting.intensity(self.model, uv, 1.0);
        *color = self.model.diffuse(uv) * intensity;
        return false;
    }
}

/// Phong shading dimmed where the shadow buffer, rendered from the light, says the fragment is occluded.
pub struct ShadowShader<'a> {
    model: &'a Model,
    lighting: Lighting,
    /// Frame-buffer coordinates of this pass to shadow-buffer coordinates.
    uniform_shadow: Matrix4f,
    shadow_buffer: &'a Image,
    varying_uv: Matrix2x3<f64>,
    varying_tri: Matrix3<f64>,
}

impl<'a> ShadowShader<'a> {
    pub fn new(model: &'a Model, lighting: Lighting, uniform_shadow: Matrix4f, shadow_buffer: &'a Image) -> Self {
        return Self {
            model,
            lighting,
            uniform_shadow,
            shadow_buffer,
            varying_uv: Matrix2x3::zeros(),
            varying_tri: Matrix3::zeros(),
        };
    }

    /// 1.0 for lit fragments, `SHADOW_FACTOR` for occluded ones. A fragment counts as occluded
    /// when the stored shadow depth is below its own depth in the shadow buffer.
    fn shadow_coef(&self, bar: Vector3f) -> f64 {
        let point = self.uniform_shadow * embed(self.varying_tri * bar);
        let point = point / point.w;
        let stored = self.shadow_buffer.get(point.x as i32, point.y as i32).bgra[0] as f64 - SHADOW_BIAS;
        if stored < point.z {
            return SHADOW_FACTOR;
        }
        return 1.0;
    }
}

impl<'a> Shader for ShadowShader<'a> {
    fn vertex(&mut self, transform: &Transform, iface: usize, nthvert: usize) -> Vector4f {
        let clip = clip_position(transform, self.model, iface, nthvert);
        self.varying_uv.set_column(nthvert, &self.model.uv(iface, nthvert));
        self.varying_tri.set_column(nthvert, &screen_position(clip));
        return clip;
    }

    fn fragment(&self, bar: Vector3f, color: &mut Color) -> bool {
        let shadow = self.shadow_coef(bar);
        let uv = self.varying_uv * bar;
        let intensity = self.lighting.intensity(self.model, uv, shadow);
        *color = self.model.diffuse(uv) * intensity;
        return false;
    }
}

/// Screen-space ambient occlusion: share of hemisphere samples around the fragment that end up
/// behind the depth buffer, output as gray.
pub struct OcclusionShader<'a> {
    model: &'a Model,
    depth_buffer: &'a Image,
    kernel: Vec<Vector3f>,
    /// Kernel scale in frame-buffer units. At 0.0 every sample sits on the fragment itself.
    radius: f64,
    varying_uv: Matrix2x3<f64>,
    varying_tri: Matrix3<f64>,
}

impl<'a> OcclusionShader<'a> {
    pub fn new(model: &'a Model, depth_buffer: &'a Image, radius: f64) -> Self {
        return Self {
            model,
            depth_buffer,
            kernel: hemisphere_kernel(KERNEL_SIZE),
            radius,
            varying_uv: Matrix2x3::zeros(),
            varying_tri: Matrix3::zeros(),
        };
    }

    /// Rotation taking +z onto the normal.
    fn normal_rotation(normal: Vector3f) -> Matrix3<f64> {
        let theta = normal.z.clamp(-1.0, 1.0).acos();
        let phi = normal.y.atan2(normal.x);
        return rotation_z(phi) * rotation_y(theta);
    }
}

impl<'a> Shader for OcclusionShader<'a> {
    fn vertex(&mut self, transform: &Transform, iface: usize, nthvert: usize) -> Vector4f {
        let clip = clip_position(transform, self.model, iface, nthvert);
        self.varying_uv.set_column(nthvert, &self.model.uv(iface, nthvert));
        self.varying_tri.set_column(nthvert, &screen_position(clip));
        return clip;
    }

    fn fragment(&self, bar: Vector3f, color: &mut Color) -> bool {
        let uv = self.varying_uv * bar;
        let rotation = Self::normal_rotation(normalize_or_zero(self.model.normal_map(uv)));
        let point = self.varying_tri * bar;

        let occluded = self
            .kernel
            .iter()
            .map(|offset| point + rotation * offset * self.radius)
            .filter(|sample| self.depth_buffer.get(sample.x as i32, sample.y as i32).bgra[0] as f64 > sample.z)
            .count();
        let value = (255.0 * occluded as f64 / self.kernel.len() as f64) as u8;
        *color = Color::rgb(value, value, value);
        return false;
    }
}

/// Writes depth as a gray level, used to fill shadow and depth maps.
pub struct DepthShader<'a> {
    model: &'a Model,
    max_depth: f64,
    varying_tri: Matrix3<f64>,
}

impl<'a> DepthShader<'a> {
    pub fn new(model: &'a Model, max_depth: f64) -> Self {
        return Self {
            model,
            max_depth,
            varying_tri: Matrix3::zeros(),
        };
    }
}

impl<'a> Shader for DepthShader<'a> {
    fn vertex(&mut self, transform: &Transform, iface: usize, nthvert: usize) -> Vector4f {
        let clip = clip_position(transform, self.model, iface, nthvert);
        self.varying_tri.set_column(nthvert, &screen_position(clip));
        return clip;
    }

    fn fragment(&self, bar: Vector3f, color: &mut Color) -> bool {
        let point = self.varying_tri * bar;
        *color = WHITE * (point.z / self.max_depth);
        return false;
    }
}

/// Black everywhere, only the depth buffer gets filled.
pub struct EmptyShader<'a> {
    model: &'a Model,
}

impl<'a> EmptyShader<'a> {
    pub fn new(model: &'a Model) -> Self {
        return Self { model };
    }
}

impl<'a> Shader for EmptyShader<'a> {
    fn vertex(&mut self, transform: &Transform, iface: usize, nthvert: usize) -> Vector4f {
        return clip_position(transform, self.model, iface, nthvert);
    }

    fn fragment(&self, _bar: Vector3f, color: &mut Color) -> bool {
        *color = BLACK;
        return false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Format;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    /// One triangle at z = 5 facing +z, with single texel textures.
    fn textured_model() -> Model {
        let text = "v 1 1 5\nv 3 1 5\nv 1 3 5\nvt 0.25 0.5\nvt 0.75 0.5\nvn 0 0 1\n\
                    f 1/1/1 2/2/1 3/1/1\n";
        let mut model = Model::parse(Cursor::new(text)).unwrap();
        let mut diffuse = Image::new(2, 1, Format::Rgb);
        diffuse.set(0, 0, Color::rgb(255, 255, 255));
        diffuse.set(1, 0, Color::rgb(255, 0, 0));
        model.set_diffuse_map(diffuse);
        let mut normals = Image::new(1, 1, Format::Rgb);
        normals.set(0, 0, Color::rgb(128, 128, 0));
        model.set_normal_map(normals);
        let mut specular = Image::new(1, 1, Format::Grayscale);
        specular.set(0, 0, Color::gray(1));
        model.set_specular_map(specular);
        return model;
    }

    fn run_vertices<S: Shader>(shader: &mut S, transform: &Transform) -> [Vector4f; 3] {
        return [0, 1, 2].map(|nthvert| shader.vertex(transform, 0, nthvert));
    }

    fn shade<S: Shader>(shader: &S, bar: Vector3f) -> Color {
        let mut color = Color::default();
        assert!(!shader.fragment(bar, &mut color));
        return color;
    }

    fn center() -> Vector3f {
        return vector![1.0, 1.0, 1.0] / 3.0;
    }

    #[test]
    fn shader_kind_names_round_trip() {
        for name in ["flat", "texture", "phong", "shadow", "occlusion", "depth", "empty"] {
            let kind: ShaderKind = name.parse().unwrap();
            assert_eq!(kind.to_string(), name);
        }
        assert_eq!(
            "gouraud".parse::<ShaderKind>(),
            Err(ParseShaderKindError("gouraud".to_string()))
        );
    }

    #[test]
    fn vertex_stage_returns_clip_position() {
        let model = textured_model();
        let mut transform = Transform::default();
        transform.set_viewport(0, 0, 10, 10, 255.0);
        let mut shader = EmptyShader::new(&model);
        let clip = run_vertices(&mut shader, &transform);
        assert_relative_eq!(clip[1], vector![20.0, 10.0, 765.0, 1.0]);
        assert!(shade(&shader, center()).is_black());
    }

    #[test]
    fn flat_shader_interpolates_intensity() {
        let model = textured_model();
        let transform = Transform::default();
        let mut shader = FlatShader::new(&model, vector![0.0, 0.0, 1.0]);
        run_vertices(&mut shader, &transform);
        assert_eq!(shade(&shader, vector![1.0, 0.0, 0.0]), WHITE);

        let mut dim = FlatShader::new(&model, vector![0.0, 0.0, 0.5]);
        run_vertices(&mut dim, &transform);
        assert_eq!(shade(&dim, vector![0.0, 0.5, 0.5]), Color::rgba(127, 127, 127, 127));

        let mut back = FlatShader::new(&model, vector![0.0, 0.0, -1.0]);
        run_vertices(&mut back, &transform);
        assert!(shade(&back, center()).is_black());
    }

    #[test]
    fn texture_shader_samples_interpolated_uv() {
        let model = textured_model();
        let mut shader = TextureShader::new(&model, vector![0.0, 0.0, 1.0]);
        run_vertices(&mut shader, &Transform::default());
        let rgb = |color: Color| (color.r(), color.g(), color.b());
        assert_eq!(rgb(shade(&shader, vector![1.0, 0.0, 0.0])), (255, 255, 255));
        assert_eq!(rgb(shade(&shader, vector![0.0, 1.0, 0.0])), (255, 0, 0));
    }

    #[test]
    fn phong_shader_lights_facing_surface() {
        let model = textured_model();
        let transform = Transform::default();
        let lighting = Lighting::new(&transform, vector![0.0, 0.0, -1.0], 0.3).unwrap();
        let mut shader = PhongShader::new(&model, lighting);
        run_vertices(&mut shader, &transform);
        // Full diffuse, the reflection points away so specular is 0.
        let expected = (255.0 * (0.3 + DIFFUSE_WEIGHT)) as u8;
        assert_eq!(shade(&shader, vector![1.0, 0.0, 0.0]).r(), expected);
    }

    #[test]
    fn lighting_rejects_singular_transform() {
        let mut transform = Transform::default();
        transform.model_view = Matrix4f::zeros();
        assert!(Lighting::new(&transform, vector![0.0, 0.0, 1.0], 0.3).is_none());
    }

    #[test]
    fn empty_shadow_buffer_darkens_everything() {
        let model = textured_model();
        let transform = Transform::default();
        let lighting = Lighting::new(&transform, vector![0.0, 0.0, -1.0], 0.3).unwrap();
        let shadow_buffer = Image::new(8, 8, Format::Grayscale);
        let mut shader = ShadowShader::new(&model, lighting, Matrix4f::identity(), &shadow_buffer);
        run_vertices(&mut shader, &transform);

        let expected = (255.0 * (0.3 + SHADOW_FACTOR * DIFFUSE_WEIGHT)) as u8;
        for bar in [vector![1.0, 0.0, 0.0], center(), vector![0.0, 0.5, 0.5]] {
            assert_eq!(shade(&shader, bar).r(), expected);
        }
    }

    #[test]
    fn shadow_buffer_above_fragment_keeps_full_light() {
        let model = textured_model();
        let transform = Transform::default();
        let lighting = Lighting::new(&transform, vector![0.0, 0.0, -1.0], 0.3).unwrap();
        let mut shadow_buffer = Image::new(8, 8, Format::Grayscale);
        shadow_buffer.set(1, 1, Color::gray(200));
        let mut shader = ShadowShader::new(&model, lighting, Matrix4f::identity(), &shadow_buffer);
        run_vertices(&mut shader, &transform);

        let lit = (255.0 * (0.3 + DIFFUSE_WEIGHT)) as u8;
        assert_eq!(shade(&shader, vector![1.0, 0.0, 0.0]).r(), lit);
        // Vertex 1 sits on (3, 1) where nothing was recorded.
        let dark = (255.0 * (0.3 + SHADOW_FACTOR * DIFFUSE_WEIGHT)) as u8;
        assert_eq!(shade(&shader, vector![0.0, 1.0, 0.0]).r(), dark);
    }

    #[test]
    fn depth_shader_writes_normalized_depth() {
        let model = textured_model();
        let mut shader = DepthShader::new(&model, 10.0);
        run_vertices(&mut shader, &Transform::default());
        assert_eq!(shade(&shader, center()), WHITE * 0.5);
    }

    #[test]
    fn occlusion_counts_samples_behind_depth_buffer() {
        let model = textured_model();
        let mut far = Image::new(8, 8, Format::Grayscale);
        for y in 0..8 {
            for x in 0..8 {
                far.set(x, y, Color::gray(255));
            }
        }
        let mut shader = OcclusionShader::new(&model, &far, 0.0);
        run_vertices(&mut shader, &Transform::default());
        assert_eq!(shade(&shader, center()), Color::rgb(255, 255, 255));

        let near = Image::new(8, 8, Format::Grayscale);
        let mut shader = OcclusionShader::new(&model, &near, 2.0);
        run_vertices(&mut shader, &Transform::default());
        assert_eq!(shade(&shader, center()), Color::rgb(0, 0, 0));
    }

    #[test]
    fn kernel_stays_in_upper_unit_hemisphere() {
        let kernel = hemisphere_kernel(KERNEL_SIZE);
        assert_eq!(kernel.len(), KERNEL_SIZE);
        for sample in kernel {
            assert!(sample.z > 0.0);
            assert!(sample.norm() <= 1.0 + 1e-12);
        }
    }

    #[test]
    fn normal_rotation_aligns_z_with_normal() {
        for normal in [vector![1.0, 0.0, 0.0], vector![0.0, -1.0, 0.0], vector![1.0, 2.0, -3.0].normalize()] {
            let rotated = OcclusionShader::normal_rotation(normal) * vector![0.0, 0.0, 1.0];
            assert_relative_eq!(rotated, normal, epsilon = 1e-12);
        }
    }
}
