//! Render settings, read from an optional TOML file. Every key may be left out.

use std::fs;
use std::path::Path;

use nalgebra::vector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scene::shader::ShaderKind;
use crate::util::Vector3f;

/// Largest side a TGA header can describe.
const MAX_SIZE: u32 = u16::MAX as u32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// Depth range of the viewport, also the largest value a depth buffer pixel can hold.
    pub max_depth: u32,
    pub gamma: f64,
    pub ambient: f64,
    pub light_direction: [f64; 3],
    pub camera: [f64; 3],
    pub center: [f64; 3],
    pub up: [f64; 3],
    pub shader: ShaderKind,
    pub occlusion_radius: f64,
    pub perspective_correct: bool,
    pub rle: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        return RenderConfig {
            width: 1000,
            height: 1000,
            max_depth: 255,
            gamma: 1.0,
            ambient: 0.30,
            light_direction: [0.33, 0.33, 0.33],
            camera: [0.0, 0.0, 100.0],
            center: [0.0, 0.0, 0.0],
            up: [0.0, 1.0, 0.0],
            shader: ShaderKind::Shadow,
            occlusion_radius: 0.0,
            perspective_correct: false,
            rle: true,
        };
    }
}

impl RenderConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RenderConfig, ConfigError> {
        let contents = fs::read_to_string(path)?;
        return RenderConfig::parse(&contents);
    }

    pub fn parse(contents: &str) -> Result<RenderConfig, ConfigError> {
        let config: RenderConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        return Ok(config);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 || self.width > MAX_SIZE || self.height > MAX_SIZE {
            return Err(ConfigError::Invalid(format!(
                "frame size {}x{} must be within 1..={} on both sides",
                self.width, self.height, MAX_SIZE
            )));
        }
        if !(1..=255).contains(&self.max_depth) {
            return Err(ConfigError::Invalid(format!(
                "max_depth {} must be within 1..=255",
                self.max_depth
            )));
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(ConfigError::Invalid(format!("gamma {} must be positive", self.gamma)));
        }
        return Ok(());
    }

    pub fn light_direction(&self) -> Vector3f {
        return to_vector(self.light_direction);
    }

    pub fn camera(&self) -> Vector3f {
        return to_vector(self.camera);
    }

    pub fn center(&self) -> Vector3f {
        return to_vector(self.center);
    }

    pub fn up(&self) -> Vector3f {
        return to_vector(self.up);
    }
}

fn to_vector(v: [f64; 3]) -> Vector3f {
    return vector![v[0], v[1], v[2]];
}
