pub mod app;
pub mod config;
pub mod image;
pub mod scene;
pub mod util;
