//! Manual mode: every pixel takes the height of its nearest swatch's layer.

use super::{HeightField, LayerStack};
use crate::cancel::{Cancelled, Checkpoint};
use crate::crop::RasterCrop;
use crate::error::Result;
use crate::progress::Progress;
use crate::types::color::distance_sq;
use crate::types::{BuildParams, Rgb};
use std::collections::HashMap;

/// Palette swatches and where each one sits in the layer order.
#[derive(Debug, Clone, PartialEq)]
pub struct SwatchMapping {
    colors: Vec<Rgb>,
    /// Stack position per swatch, `None` when the swatch is not stacked.
    positions: Vec<Option<usize>>,
}

impl SwatchMapping {
    pub fn new(params: &BuildParams) -> Result<Self> {
        let swatches = params.swatches()?;
        let mut colors = Vec::with_capacity(swatches.len());
        let mut positions = Vec::with_capacity(swatches.len());
        for (swatch_index, color) in swatches {
            colors.push(color);
            positions.push(
                params
                    .layers
                    .iter()
                    .position(|layer| layer.swatch_index == swatch_index),
            );
        }
        Ok(Self { colors, positions })
    }

    /// Stack position of the swatch nearest to `rgb`.
    pub fn position_for(&self, rgb: Rgb) -> Option<usize> {
        let nearest = self
            .colors
            .iter()
            .enumerate()
            .min_by_key(|&(_, swatch)| distance_sq(rgb, *swatch))
            .map(|(i, _)| i)?;
        self.positions[nearest]
    }
}

pub fn build(
    crop: &RasterCrop,
    mapping: &SwatchMapping,
    stack: &LayerStack,
    checkpoint: &mut Checkpoint<'_>,
    progress: &mut Progress<'_>,
    span: (f32, f32),
) -> std::result::Result<HeightField, Cancelled> {
    let mut field = HeightField::zeros(crop.width, crop.height);
    // Quantized images reuse a handful of colors; skip the palette scan for repeats.
    let mut cache: HashMap<Rgb, Option<usize>> = HashMap::new();

    for y in 0..crop.height {
        checkpoint.tick()?;
        let row_start = (y * crop.width) as usize;
        for (x, pixel) in crop.row(y).iter().enumerate() {
            if pixel[3] == 0 {
                continue;
            }
            let rgb = [pixel[0], pixel[1], pixel[2]];
            let position = *cache
                .entry(rgb)
                .or_insert_with(|| mapping.position_for(rgb));
            if let Some(position) = position {
                field.values[row_start + x] = stack.top(position);
            }
        }
        progress.report_stage(span.0, span.1, y as usize + 1, crop.height as usize);
    }

    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LayerSpec;

    fn params() -> BuildParams {
        let mut params = BuildParams::with_layers(vec![
            LayerSpec::new(0, "#000000", 0.2),
            LayerSpec::new(1, "#ffffff", 0.4),
        ]);
        params.palette = vec!["#000000".into(), "#ffffff".into(), "#ff0000".into()];
        params
    }

    #[test]
    fn test_heights_follow_layer_order() {
        let params = params();
        let stack = LayerStack::new(&params);
        let mapping = SwatchMapping::new(&params).unwrap();
        let crop = RasterCrop::from_pixels(
            3,
            1,
            vec![[250, 250, 250, 255], [5, 5, 5, 255], [0, 0, 0, 0]],
        )
        .unwrap();

        let field = build(
            &crop,
            &mapping,
            &stack,
            &mut Checkpoint::unbounded(),
            &mut Progress::silent(),
            (0.0, 1.0),
        )
        .unwrap();

        assert!((field.values[0] - 0.6).abs() < 1e-6);
        assert!((field.values[1] - 0.2).abs() < 1e-6);
        assert_eq!(field.values[2], 0.0);
    }

    #[test]
    fn test_unstacked_swatch_has_no_material() {
        let params = params();
        let mapping = SwatchMapping::new(&params).unwrap();
        assert_eq!(mapping.position_for([240, 10, 10]), None);
        assert_eq!(mapping.position_for([10, 10, 10]), Some(0));
    }
}
