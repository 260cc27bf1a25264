//! Small encoded images for unit tests.

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};

fn encode(format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(4, 3, |x, y| Rgb([x as u8 * 60, y as u8 * 80, 128]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
    bytes
}

pub(crate) fn png_bytes() -> Vec<u8> {
    encode(ImageFormat::Png)
}

pub(crate) fn jpeg_bytes() -> Vec<u8> {
    encode(ImageFormat::Jpeg)
}
