//! Opaque bounding-box extraction and the cropped pixel grid.

use crate::error::{MesherError, Result};
use crate::types::Rgb;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Rectangle of the source image, in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropBounds {
    pub min_x: u32,
    pub min_y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropBounds {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Tight rectangle around every pixel with non-zero alpha.
///
/// Falls back to the full image when nothing is opaque.
pub fn opaque_bounds(image: &RgbaImage) -> CropBounds {
    let (width, height) = image.dimensions();
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;

    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0[3] > 0 {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if !found {
        return CropBounds {
            min_x: 0,
            min_y: 0,
            width,
            height,
        };
    }

    CropBounds {
        min_x,
        min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    }
}

/// The cropped RGBA grid one build works on.
///
/// `step` is the number of source pixels per grid cell along each axis; it is
/// 1 for full resolution and larger for preview or size-guarded builds.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterCrop {
    pub bounds: CropBounds,
    pub width: u32,
    pub height: u32,
    pub step: u32,
    pixels: Vec<[u8; 4]>,
}

impl RasterCrop {
    /// Crop a decoded image to its opaque bounds.
    pub fn from_image(image: &RgbaImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(MesherError::EmptyImage { width, height });
        }

        let bounds = opaque_bounds(image);
        let mut pixels = Vec::with_capacity(bounds.area() as usize);
        for y in bounds.min_y..bounds.min_y + bounds.height {
            for x in bounds.min_x..bounds.min_x + bounds.width {
                pixels.push(image.get_pixel(x, y).0);
            }
        }

        Ok(Self {
            bounds,
            width: bounds.width,
            height: bounds.height,
            step: 1,
            pixels,
        })
    }

    /// Build a grid directly from row-major RGBA pixels, uncropped.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<[u8; 4]>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(MesherError::EmptyImage { width, height });
        }
        if pixels.len() != width as usize * height as usize {
            return Err(MesherError::InvalidParams(format!(
                "expected {} pixels for {}x{}, got {}",
                width as usize * height as usize,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            bounds: CropBounds {
                min_x: 0,
                min_y: 0,
                width,
                height,
            },
            width,
            height,
            step: 1,
            pixels,
        })
    }

    /// Coarser grid keeping the centre pixel of each `step × step` block.
    ///
    /// Sampling instead of averaging keeps every cell on an exact palette color.
    pub fn resample(&self, step: u32) -> Self {
        let step = step.max(1);
        if step == 1 {
            return self.clone();
        }

        let width = self.width.div_ceil(step);
        let height = self.height.div_ceil(step);
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for by in 0..height {
            let y = (by * step + step / 2).min(self.height - 1);
            for bx in 0..width {
                let x = (bx * step + step / 2).min(self.width - 1);
                pixels.push(self.pixel(x, y));
            }
        }

        Self {
            bounds: self.bounds,
            width,
            height,
            step: self.step * step,
            pixels,
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn pixels(&self) -> &[[u8; 4]] {
        &self.pixels
    }

    /// Row-major pixels of row `y`.
    pub fn row(&self, y: u32) -> &[[u8; 4]] {
        let start = (y * self.width) as usize;
        &self.pixels[start..start + self.width as usize]
    }

    pub fn is_opaque(&self, index: usize) -> bool {
        self.pixels[index][3] > 0
    }

    pub fn rgb(&self, index: usize) -> Rgb {
        let [r, g, b, _] = self.pixels[index];
        [r, g, b]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn image_with(width: u32, height: u32, opaque: &[(u32, u32)]) -> RgbaImage {
        let mut image = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
        for &(x, y) in opaque {
            image.put_pixel(x, y, Rgba([10, 20, 30, 255]));
        }
        image
    }

    #[test]
    fn test_tight_bounds() {
        let image = image_with(10, 8, &[(2, 3), (5, 6), (4, 1)]);
        assert_eq!(
            opaque_bounds(&image),
            CropBounds {
                min_x: 2,
                min_y: 1,
                width: 4,
                height: 6
            }
        );
    }

    #[test]
    fn test_fully_transparent_falls_back_to_full_image() {
        let image = image_with(7, 3, &[]);
        assert_eq!(
            opaque_bounds(&image),
            CropBounds {
                min_x: 0,
                min_y: 0,
                width: 7,
                height: 3
            }
        );
    }

    #[test]
    fn test_crop_copies_pixels() {
        let image = image_with(5, 5, &[(1, 1), (3, 2)]);
        let crop = RasterCrop::from_image(&image).unwrap();
        assert_eq!((crop.width, crop.height), (3, 2));
        assert!(crop.is_opaque(0));
        assert!(crop.is_opaque(5));
        assert!(!crop.is_opaque(1));
        assert_eq!(crop.rgb(0), [10, 20, 30]);
    }

    #[test]
    fn test_zero_size_image_is_an_error() {
        let image = RgbaImage::new(0, 4);
        assert!(matches!(
            RasterCrop::from_image(&image),
            Err(MesherError::EmptyImage { .. })
        ));
    }

    #[test]
    fn test_resample_samples_block_centres() {
        let pixels: Vec<[u8; 4]> = (0..25).map(|i| [i as u8, 0, 0, 255]).collect();
        let crop = RasterCrop::from_pixels(5, 5, pixels).unwrap();
        let coarse = crop.resample(2);
        assert_eq!((coarse.width, coarse.height, coarse.step), (3, 3, 2));
        // Block (0,0) samples source (1,1); the clipped last block samples (4,4).
        assert_eq!(coarse.pixel(0, 0)[0], 6);
        assert_eq!(coarse.pixel(2, 2)[0], 24);
    }
}
