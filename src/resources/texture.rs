//! Texture loading and management

use std::path::Path;

use image::{DynamicImage, GenericImageView};

use crate::backend::{FilterMode, GraphicsHandle, PixelFormat};
use crate::error::LoadError;

/// Decoded pixels, bottom row first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl ImageData {
    /// Load an image file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        if !path.exists() {
            return Err(LoadError::NotFound(display));
        }
        let img = image::open(path).map_err(|e| LoadError::Decode {
            path: display,
            reason: e.to_string(),
        })?;
        Ok(Self::from_image(img))
    }

    /// Decode an in-memory image file
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, LoadError> {
        let img = image::load_from_memory(bytes).map_err(|e| LoadError::Decode {
            path: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_image(img))
    }

    /// Convert keeping the channel count and flip rows for bottom-up upload
    fn from_image(img: DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        let img = img.flipv();
        let (format, pixels) = match img.color().channel_count() {
            1 => (PixelFormat::R8, img.to_luma8().into_raw()),
            2 => (PixelFormat::Rg8, img.to_luma_alpha8().into_raw()),
            3 => (PixelFormat::Rgb8, img.to_rgb8().into_raw()),
            _ => (PixelFormat::Rgba8, img.to_rgba8().into_raw()),
        };
        Self {
            width,
            height,
            format,
            pixels,
        }
    }

    /// Create a solid color image
    pub fn solid_color(color: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            format: PixelFormat::Rgba8,
            pixels: color.to_vec(),
        }
    }

    /// Create a checkerboard image with `cell`-pixel squares
    pub fn checkerboard(size: u32, cell: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let mut pixels = Vec::with_capacity(rgba8_len(size, size));

        for y in 0..size {
            for x in 0..size {
                let is_even = ((x / cell) + (y / cell)) % 2 == 0;
                let color = if is_even { color1 } else { color2 };
                pixels.extend_from_slice(&color);
            }
        }

        Self {
            width: size,
            height: size,
            format: PixelFormat::Rgba8,
            pixels,
        }
    }
}

/// Byte length of a tightly packed Rgba8 image
fn rgba8_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Cached texture; starts as an empty placeholder
#[derive(Debug, Default)]
pub struct TextureResource {
    pub image: Option<ImageData>,
    pub gpu: Option<GraphicsHandle>,
    pub filter: FilterMode,
    pub build_mips: bool,
    /// False when `gpu` aliases the builtin placeholder
    pub owned: bool,
    /// The decoder failed and the placeholder texture was used instead
    pub substituted: bool,
}

impl TextureResource {
    /// Placeholder for a file texture awaiting decode
    pub fn pending() -> Self {
        Self {
            build_mips: true,
            ..Default::default()
        }
    }

    pub fn is_built(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.image.as_ref().map(|img| (img.width, img.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_flips_rows() {
        let mut img = image::RgbaImage::new(1, 2);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        img.put_pixel(0, 1, image::Rgba([0, 0, 255, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();

        let data = ImageData::from_bytes(&bytes, "two.png").unwrap();
        assert_eq!((data.width, data.height), (1, 2));
        assert_eq!(data.format, PixelFormat::Rgba8);
        assert_eq!(&data.pixels[..4], &[0, 0, 255, 255]);
        assert_eq!(&data.pixels[4..], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_grayscale_keeps_one_channel() {
        let img = image::GrayImage::from_pixel(2, 2, image::Luma([7]));
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();

        let data = ImageData::from_bytes(&bytes, "gray.png").unwrap();
        assert_eq!(data.format, PixelFormat::R8);
        assert_eq!(data.pixels, vec![7; 4]);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = ImageData::from_file("definitely/not/here.png").unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn test_checkerboard() {
        let data = ImageData::checkerboard(2, 1, [255; 4], [0; 4]);
        assert_eq!(data.pixels.len(), 16);
        assert_eq!(&data.pixels[..4], &[255; 4]);
        assert_eq!(&data.pixels[4..8], &[0; 4]);
    }

    #[test]
    fn test_checkerboard_cells_span_pixels() {
        let data = ImageData::checkerboard(3, 2, [1; 4], [2; 4]);
        assert_eq!(data.pixels.len(), rgba8_len(3, 3));
        let pixel = |x: usize, y: usize| data.pixels[(y * 3 + x) * 4];
        assert_eq!((pixel(0, 0), pixel(1, 1), pixel(2, 0), pixel(2, 2)), (1, 1, 2, 1));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_rgba8_len_does_not_wrap() {
        assert_eq!(rgba8_len(65536, 65536), 1 << 34);
        assert_eq!(rgba8_len(u32::MAX, 1), u32::MAX as usize * 4);
    }
}
