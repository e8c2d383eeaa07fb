//! Auto-paint by luminance: brighter pixels stand taller.

use super::{HeightField, LayerStack};
use crate::cancel::{Cancelled, Checkpoint};
use crate::crop::RasterCrop;
use crate::progress::Progress;
use crate::types::color::luminance;

/// Image-wide luminance extent of the opaque pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LuminanceRange {
    pub min: f32,
    pub max: f32,
}

impl LuminanceRange {
    /// `None` when the crop has no opaque pixel.
    pub fn scan(crop: &RasterCrop) -> Option<Self> {
        let mut range: Option<Self> = None;
        for (index, pixel) in crop.pixels().iter().enumerate() {
            if pixel[3] == 0 {
                continue;
            }
            let l = luminance(crop.rgb(index));
            range = Some(match range {
                None => Self { min: l, max: l },
                Some(r) => Self {
                    min: r.min.min(l),
                    max: r.max.max(l),
                },
            });
        }
        range
    }

    /// Map a luminance into `[0, 1]`. A flat image maps everything to 1.
    pub fn normalize(&self, l: f32) -> f32 {
        let span = self.max - self.min;
        if span < 1e-6 {
            1.0
        } else {
            ((l - self.min) / span).clamp(0.0, 1.0)
        }
    }
}

/// Continuous (unsnapped) luminance heights.
pub fn build(
    crop: &RasterCrop,
    stack: &LayerStack,
    checkpoint: &mut Checkpoint<'_>,
    progress: &mut Progress<'_>,
    span: (f32, f32),
) -> Result<HeightField, Cancelled> {
    let mut field = HeightField::zeros(crop.width, crop.height);
    let Some(range) = LuminanceRange::scan(crop) else {
        return Ok(field);
    };

    let base = stack.first_layer_height();
    let rise = stack.total_height() - base;

    for y in 0..crop.height {
        checkpoint.tick()?;
        let row_start = (y * crop.width) as usize;
        for x in 0..crop.width as usize {
            let index = row_start + x;
            if !crop.is_opaque(index) {
                continue;
            }
            let t = range.normalize(luminance(crop.rgb(index)));
            field.values[index] = base + t * rise;
        }
        progress.report_stage(span.0, span.1, y as usize + 1, crop.height as usize);
    }

    Ok(field)
}
