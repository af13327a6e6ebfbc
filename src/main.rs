use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use tiny_rasterizer::app;
use tiny_rasterizer::config::RenderConfig;
use tiny_rasterizer::scene::shader::ShaderKind;

const DEFAULT_MODEL: &str = "obj/african_head.obj";

fn usage() -> String {
    return String::from("usage: tiny_rasterizer [-m model.obj]... [-c config.toml] [-s shader] [-o output_dir]");
}

/// Reads `-m`, `-c`, `-s` and `-o`, each followed by its value.
fn parse_args(args: &[String]) -> Result<app::Params, Box<dyn std::error::Error>> {
    let mut model_paths = Vec::new();
    let mut config_path = None;
    let mut shader: Option<ShaderKind> = None;
    let mut output_dir = PathBuf::from(".");

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).ok_or_else(|| format!("missing value for {}\n{}", args[i], usage()));
        match args[i].as_str() {
            "-m" => { model_paths.push(PathBuf::from(value?)); }
            "-c" => { config_path = Some(PathBuf::from(value?)); }
            "-s" => { shader = Some(value?.parse()?); }
            "-o" => { output_dir = PathBuf::from(value?); }
            other => { return Err(format!("unknown argument {}\n{}", other, usage()).into()); }
        }
        i += 2;
    }

    if model_paths.is_empty() {
        model_paths.push(PathBuf::from(DEFAULT_MODEL));
    }
    let mut config = match config_path {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    };
    if let Some(shader) = shader {
        config.shader = shader;
    }

    return Ok(app::Params {
        model_paths,
        output_dir,
        config,
    });
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let params = match parse_args(&args) {
        Ok(params) => params,
        Err(error) => {
            log::error!("{}", error);
            return ExitCode::FAILURE;
        }
    };

    if let Err(error) = app::run(params) {
        log::error!("{}", error);
        return ExitCode::FAILURE;
    }
    return ExitCode::SUCCESS;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        return std::iter::once("tiny_rasterizer").chain(list.iter().copied()).map(String::from).collect();
    }

    #[test]
    fn defaults_without_arguments() {
        let params = parse_args(&args(&[])).unwrap();
        assert_eq!(params.model_paths, vec![PathBuf::from(DEFAULT_MODEL)]);
        assert_eq!(params.output_dir, PathBuf::from("."));
        assert_eq!(params.config, RenderConfig::default());
    }

    #[test]
    fn repeated_models_and_shader_override() {
        let params = parse_args(&args(&["-m", "a.obj", "-m", "b.obj", "-s", "phong", "-o", "out"])).unwrap();
        assert_eq!(params.model_paths, vec![PathBuf::from("a.obj"), PathBuf::from("b.obj")]);
        assert_eq!(params.config.shader, ShaderKind::Phong);
        assert_eq!(params.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(parse_args(&args(&["-s", "gouraud"])).is_err());
        assert!(parse_args(&args(&["-m"])).is_err());
        assert!(parse_args(&args(&["--fast"])).is_err());
        assert!(parse_args(&args(&["-c", "/nonexistent/config.toml"])).is_err());
    }
}
