use std::fs;
use std::ops;
use std::path::Path;

use ::image::{DynamicImage, GenericImageView, ImageFormat};
use thiserror::Error;

use crate::util::Vector2i;

/// Longest run (or raw chunk) a single RLE packet can describe.
const MAX_CHUNK_LENGTH: usize = 128;
const TGA_FOOTER: &[u8] = b"TRUEVISION-XFILE.\0";

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decode error: {0}")]
    Decode(#[from] ::image::ImageError),
    #[error("Image of {width}x{height} does not fit into a TGA header")]
    TooLarge { width: u32, height: u32 },
}

/// Number of channels stored per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Grayscale = 1,
    Rgb = 3,
    Rgba = 4,
}

impl Format {
    pub fn bytes_per_pixel(self) -> usize {
        return self as usize;
    }
}

/// Pixel color in b, g, r, a byte order. `bytespp` tells how many of the channels are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub bgra: [u8; 4],
    pub bytespp: u8,
}

pub const WHITE: Color = Color::rgb(255, 255, 255);
pub const BLACK: Color = Color::rgb(0, 0, 0);

impl Default for Color {
    fn default() -> Self {
        return Color { bgra: [0; 4], bytespp: 1 };
    }
}

impl Color {
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Color {
        return Color { bgra: [b, g, r, a], bytespp: 4 };
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Color {
        return Color::rgba(r, g, b, 255);
    }

    /// Single channel value, the way depth is stored.
    pub const fn gray(value: u8) -> Color {
        return Color { bgra: [value, 0, 0, 0], bytespp: 1 };
    }

    pub fn r(&self) -> u8 {
        return self.bgra[2];
    }

    pub fn g(&self) -> u8 {
        return self.bgra[1];
    }

    pub fn b(&self) -> u8 {
        return self.bgra[0];
    }

    pub fn is_black(&self) -> bool {
        return self.bgra[..3].iter().all(|&channel| channel == 0);
    }
}

/// Scales every channel by the intensity clamped to [0, 1].
impl ops::Mul<f64> for Color {
    type Output = Color;

    fn mul(self, intensity: f64) -> Color {
        let intensity = intensity.clamp(0.0, 1.0);
        let mut result = self;
        for i in 0..4 {
            result.bgra[i] = (self.bgra[i] as f64 * intensity) as u8;
        }
        return result;
    }
}

/// Divides every channel by the intensity clamped to [0, 1], saturating at 255.
impl ops::Div<f64> for Color {
    type Output = Color;

    fn div(self, intensity: f64) -> Color {
        let intensity = intensity.clamp(0.0, 1.0);
        let mut result = self;
        for i in 0..4 {
            result.bgra[i] = (self.bgra[i] as f64 / intensity) as u8;
        }
        return result;
    }
}

impl ops::Add<Color> for Color {
    type Output = Color;

    fn add(self, rhs: Color) -> Color {
        let mut result = self;
        for i in 0..4 {
            result.bgra[i] = self.bgra[i].saturating_add(rhs.bgra[i]);
        }
        return result;
    }
}

/// Image, holding its width, height and private flat array of pixel data.
/// Row y starts at byte `y * width * bytespp`; which corner is the origin is up to the caller,
/// `flip_vertically` switches between the two conventions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    format: Format,
    data: Vec<u8>,
}

impl Image {
    /// Generates new zeroed image with specified width, height and format.
    pub fn new(width: u32, height: u32, format: Format) -> Image {
        let capacity = width as usize * height as usize * format.bytes_per_pixel();
        return Image {
            width,
            height,
            format,
            data: vec![0; capacity],
        };
    }

    /// 0x0 image, used in place of textures that failed to load.
    pub fn empty() -> Image {
        return Image::new(0, 0, Format::Grayscale);
    }

    pub fn width(&self) -> u32 {
        return self.width;
    }

    pub fn height(&self) -> u32 {
        return self.height;
    }

    pub fn format(&self) -> Format {
        return self.format;
    }

    pub fn is_empty(&self) -> bool {
        return self.data.is_empty();
    }

    pub fn as_bytes(&self) -> &[u8] {
        return &self.data[..];
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        return &mut self.data[..];
    }

    /// Byte offset of the pixel, None if the coordinate is outside of the image.
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        return Some((x as usize + y as usize * self.width as usize) * bpp);
    }

    /// Color at the coordinate, zero color when out of bounds.
    pub fn get(&self, x: i32, y: i32) -> Color {
        let index = match self.index(x, y) {
            Some(index) => index,
            None => return Color::default(),
        };
        let bpp = self.format.bytes_per_pixel();
        let mut color = Color { bgra: [0; 4], bytespp: bpp as u8 };
        color.bgra[..bpp].copy_from_slice(&self.data[index..index + bpp]);
        return color;
    }

    /// Sets image pixel to a color at specifed coordinate, copying as many channels as the image has.
    /// Returns false if the coordinate is out of bounds.
    pub fn set(&mut self, x: i32, y: i32, color: Color) -> bool {
        let index = match self.index(x, y) {
            Some(index) => index,
            None => return false,
        };
        let bpp = self.format.bytes_per_pixel();
        self.data[index..index + bpp].copy_from_slice(&color.bgra[..bpp]);
        return true;
    }

    /// Sets all pixels data to 0.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Swaps rows top to bottom.
    pub fn flip_vertically(&mut self) {
        let row_length = self.width as usize * self.format.bytes_per_pixel();
        let height = self.height as usize;
        for row in 0..height / 2 {
            let (top, bottom) = self.data.split_at_mut((height - 1 - row) * row_length);
            top[row * row_length..(row + 1) * row_length].swap_with_slice(&mut bottom[..row_length]);
        }
    }

    /// Converts a decoded image into the b, g, r, a layout, keeping one, three or four channels.
    pub fn from_dynamic(image: DynamicImage) -> Image {
        let color_type = image.color();
        let (width, height) = image.dimensions();
        if color_type.channel_count() == 1 {
            let data = image.into_luma8().into_raw();
            return Image { width, height, format: Format::Grayscale, data };
        }
        if color_type.has_alpha() {
            let mut data = image.into_rgba8().into_raw();
            for pixel in data.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
            return Image { width, height, format: Format::Rgba, data };
        }
        let mut data = image.into_rgb8().into_raw();
        for pixel in data.chunks_exact_mut(3) {
            pixel.swap(0, 2);
        }
        return Image { width, height, format: Format::Rgb, data };
    }

    /// Reads any image file the `image` crate understands, TGA with or without RLE included.
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Image, ImageError> {
        let image = ::image::open(path)?;
        return Ok(Image::from_dynamic(image));
    }

    pub fn decode_tga(bytes: &[u8]) -> Result<Image, ImageError> {
        let image = ::image::load_from_memory_with_format(bytes, ImageFormat::Tga)?;
        return Ok(Image::from_dynamic(image));
    }

    /// Serializes the image as TGA with the top-left origin flag set, so row 0 is stored first.
    /// With `rle` the payload is run-length encoded, packets never crossing a row.
    pub fn encode_tga(&self, rle: bool) -> Result<Vec<u8>, ImageError> {
        if self.width > u16::MAX as u32 || self.height > u16::MAX as u32 {
            return Err(ImageError::TooLarge { width: self.width, height: self.height });
        }
        let bpp = self.format.bytes_per_pixel();
        let data_type: u8 = match (self.format, rle) {
            (Format::Grayscale, false) => 3,
            (Format::Grayscale, true) => 11,
            (_, false) => 2,
            (_, true) => 10,
        };
        let alpha_bits: u8 = if self.format == Format::Rgba { 8 } else { 0 };

        let mut out = Vec::with_capacity(18 + self.data.len() + 8 + TGA_FOOTER.len());
        out.push(0); // id length
        out.push(0); // no color map
        out.push(data_type);
        out.extend_from_slice(&[0; 5]); // color map specification
        out.extend_from_slice(&0u16.to_le_bytes()); // x origin
        out.extend_from_slice(&0u16.to_le_bytes()); // y origin
        out.extend_from_slice(&(self.width as u16).to_le_bytes());
        out.extend_from_slice(&(self.height as u16).to_le_bytes());
        out.push((bpp * 8) as u8);
        out.push(0x20 | alpha_bits);

        if rle {
            let row_length = self.width as usize * bpp;
            if row_length > 0 {
                for row in self.data.chunks_exact(row_length) {
                    encode_rle_row(row, bpp, &mut out);
                }
            }
        } else {
            out.extend_from_slice(&self.data);
        }

        out.extend_from_slice(&[0; 4]); // extension area offset
        out.extend_from_slice(&[0; 4]); // developer area offset
        out.extend_from_slice(TGA_FOOTER);
        return Ok(out);
    }

    pub fn write_tga_file<P: AsRef<Path>>(&self, path: P, rle: bool) -> Result<(), ImageError> {
        let bytes = self.encode_tga(rle)?;
        fs::write(path, bytes)?;
        return Ok(());
    }

    /// Draws a line between two pixels. The steeper axis is walked pixel by pixel, left to right,
    /// and the other coordinate is linearly interpolated and truncated.
    pub fn draw_line(&mut self, mut a: Vector2i, mut b: Vector2i, color: Color) {
        let mut steep = false;
        let mut dx = (a.x - b.x).abs();
        let mut dy = (a.y - b.y).abs();
        if dx < dy {
            a = Vector2i::new(a.y, a.x);
            b = Vector2i::new(b.y, b.x);
            std::mem::swap(&mut dx, &mut dy);
            steep = true;
        }
        if a.x > b.x {
            std::mem::swap(&mut a, &mut b);
        }

        for x in a.x..=b.x {
            let y = if a.y == b.y {
                a.y
            } else {
                let t = (x - a.x) as f64 / dx as f64;
                (a.y as f64 * (1.0 - t) + b.y as f64 * t) as i32
            };
            if steep {
                self.set(y, x, color);
            } else {
                self.set(x, y, color);
            }
        }
    }
}

/// Appends one row of pixels as RLE packets: runs of equal pixels become run packets,
/// everything else is grouped into raw packets.
fn encode_rle_row(row: &[u8], bpp: usize, out: &mut Vec<u8>) {
    let npixels = row.len() / bpp;
    let pixel = |i: usize| &row[i * bpp..(i + 1) * bpp];

    let mut start = 0;
    while start < npixels {
        let mut run = 1;
        while start + run < npixels && run < MAX_CHUNK_LENGTH && pixel(start + run) == pixel(start) {
            run += 1;
        }
        if run > 1 {
            out.push(0x80 | (run - 1) as u8);
            out.extend_from_slice(pixel(start));
            start += run;
            continue;
        }

        let mut end = start;
        while end < npixels
            && end - start < MAX_CHUNK_LENGTH
            && (end + 1 == npixels || pixel(end) != pixel(end + 1))
        {
            end += 1;
        }
        out.push((end - start - 1) as u8);
        out.extend_from_slice(&row[start * bpp..end * bpp]);
        start = end;
    }
}
