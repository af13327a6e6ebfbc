use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time;

use thiserror::Error;
use threadpool::ThreadPool;

use crate::config::{ConfigError, RenderConfig};
use crate::image::{Format, Image, ImageError};
use crate::scene::draw_model;
use crate::scene::model::Model;
use crate::scene::shader::{
    DepthShader, EmptyShader, FlatShader, Lighting, OcclusionShader, PhongShader, Shader, ShaderKind,
    ShadowShader, TextureShader,
};
use crate::scene::transform::{Transform, TransformError};

pub const OUTPUT_FILE: &str = "output.tga";
pub const ZBUFFER_FILE: &str = "zbuffer.tga";
pub const SHADOW_FILE: &str = "shadow.tga";

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Transform of the {0} pass is singular")]
    SingularMatrix(&'static str),

    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: ImageError },

    #[error("Output writer for {0} stopped without reporting")]
    WriterLost(String),
}

pub struct Params {
    pub model_paths: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub config: RenderConfig,
}

/// Everything a render produces, origin still at the top left.
pub struct Frame {
    pub image: Image,
    pub zbuffer: Image,
    pub shadow_buffer: Image,
}

/// Draws every model with a fresh shader from `make_shader`.
fn draw_models<'a, S, F>(
    models: &'a [Model],
    transform: &Transform,
    zbuffer: &mut Image,
    image: &mut Image,
    perspective: bool,
    mut make_shader: F,
) where
    S: Shader,
    F: FnMut(&'a Model) -> S,
{
    for model in models {
        let mut shader = make_shader(model);
        draw_model(&mut shader, transform, model.nfaces(), zbuffer, image, perspective);
    }
}

/// Renders the shadow map from the light, then the models from the camera with the configured shader.
pub fn render_frame(models: &[Model], config: &RenderConfig) -> Result<Frame, Error> {
    config.validate()?;
    let (width, height) = (config.width, config.height);
    let max_depth = config.max_depth as f64;
    let perspective = config.perspective_correct;
    let light = config.light_direction();
    let (camera, center, up) = (config.camera(), config.center(), config.up());

    let mut image = Image::new(width, height, Format::Rgb);
    let mut zbuffer = Image::new(width, height, Format::Grayscale);
    let mut shadow_buffer = Image::new(width, height, Format::Grayscale);

    // Shadow buffer pass.
    let mut transform = Transform::default();
    transform.look_at(light, center, up)?;
    transform.set_projection(0.0);
    transform.set_viewport(0, 0, width, height, max_depth);
    draw_models(models, &transform, &mut zbuffer, &mut shadow_buffer, perspective, |model| {
        DepthShader::new(model, max_depth)
    });
    let m_shadow = transform.mvp();
    zbuffer.clear();

    // Final pass.
    transform.look_at(camera, center, up)?;
    transform.set_projection(-1.0 / (camera - center).norm());
    let lighting = Lighting::new(&transform, light, config.ambient).ok_or(Error::SingularMatrix("camera"))?;
    let mvp_inverse = transform.mvp().try_inverse().ok_or(Error::SingularMatrix("camera"))?;
    let uniform_shadow = m_shadow * mvp_inverse;

    log::debug!("Drawing {} model(s) with the {} shader", models.len(), config.shader);
    match config.shader {
        ShaderKind::Flat => draw_models(models, &transform, &mut zbuffer, &mut image, perspective, |model| {
            FlatShader::new(model, light)
        }),
        ShaderKind::Texture => draw_models(models, &transform, &mut zbuffer, &mut image, perspective, |model| {
            TextureShader::new(model, light)
        }),
        ShaderKind::Phong => draw_models(models, &transform, &mut zbuffer, &mut image, perspective, |model| {
            PhongShader::new(model, lighting)
        }),
        ShaderKind::Shadow => draw_models(models, &transform, &mut zbuffer, &mut image, perspective, |model| {
            ShadowShader::new(model, lighting, uniform_shadow, &shadow_buffer)
        }),
        ShaderKind::Occlusion => {
            let mut depth_buffer = Image::new(width, height, Format::Grayscale);
            draw_models(models, &transform, &mut zbuffer, &mut depth_buffer, perspective, |model| {
                DepthShader::new(model, max_depth)
            });
            zbuffer.clear();
            let radius = config.occlusion_radius;
            draw_models(models, &transform, &mut zbuffer, &mut image, perspective, |model| {
                OcclusionShader::new(model, &depth_buffer, radius)
            });
        }
        ShaderKind::Depth => draw_models(models, &transform, &mut zbuffer, &mut image, perspective, |model| {
            DepthShader::new(model, max_depth)
        }),
        ShaderKind::Empty => draw_models(models, &transform, &mut zbuffer, &mut image, perspective, |model| {
            EmptyShader::new(model)
        }),
    }

    if config.gamma != 1.0 {
        apply_gamma(&mut image, config.gamma);
    }

    return Ok(Frame {
        image,
        zbuffer,
        shadow_buffer,
    });
}

/// c' = 255 * (c / 255)^gamma on every color channel, alpha left alone.
pub fn apply_gamma(image: &mut Image, gamma: f64) {
    let mut table = [0u8; 256];
    for (value, entry) in table.iter_mut().enumerate() {
        *entry = (255.0 * (value as f64 / 255.0).powf(gamma)).round() as u8;
    }
    let bpp = image.format().bytes_per_pixel();
    let channels = bpp.min(3);
    for pixel in image.as_bytes_mut().chunks_exact_mut(bpp) {
        for channel in &mut pixel[..channels] {
            *channel = table[*channel as usize];
        }
    }
}

/// Flips every image so the origin ends up bottom left and writes them as TGA files into `dir`,
/// one pool job per file. Returns the written paths.
pub fn write_frame(frame: Frame, dir: &Path, rle: bool) -> Result<Vec<PathBuf>, Error> {
    let names = [OUTPUT_FILE, ZBUFFER_FILE, SHADOW_FILE];
    let images = [frame.image, frame.zbuffer, frame.shadow_buffer];
    let pool = ThreadPool::new(names.len());
    let (sender, receiver) = mpsc::channel();
    for (name, mut image) in names.iter().zip(images) {
        let path = dir.join(name);
        let sender = sender.clone();
        pool.execute(move || {
            image.flip_vertically();
            let result = image.write_tga_file(&path, rle);
            sender.send((path, result)).ok();
        });
    }
    drop(sender);

    let mut written = Vec::with_capacity(names.len());
    for (path, result) in receiver {
        if let Err(source) = result {
            return Err(Error::Write { path, source });
        }
        log::info!("Wrote {}", path.display());
        written.push(path);
    }
    for name in names {
        if !written.iter().any(|path| path.ends_with(name)) {
            return Err(Error::WriterLost(name.to_string()));
        }
    }
    return Ok(written);
}

/// Loads the models, renders one frame and writes it out.
pub fn run(params: Params) -> Result<(), Error> {
    params.config.validate()?;

    let time_begin = time::Instant::now();
    let models: Vec<Model> = params.model_paths.iter().map(Model::load).collect();
    log::info!("Models loaded in {:.1}ms", time_begin.elapsed().as_secs_f64() * 1000.0);

    let render_begin = time::Instant::now();
    let frame = render_frame(&models, &params.config)?;
    log::info!("Render done in {:.1}ms", render_begin.elapsed().as_secs_f64() * 1000.0);

    let output_begin = time::Instant::now();
    write_frame(frame, &params.output_dir, params.config.rle)?;
    log::info!("Written out in {:.1}ms", output_begin.elapsed().as_secs_f64() * 1000.0);

    return Ok(());
}
