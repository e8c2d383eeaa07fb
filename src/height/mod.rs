//! Per-pixel height synthesis.
//!
//! The height of a pixel is the absolute top (mm) of its material column; 0 means
//! no material. [`HeightSource`] is resolved once per build from the
//! [`HeightMode`] and then dispatched to one of the algorithms:
//!
//! - [`manual`]: nearest palette swatch → cumulative height of its layer.
//! - [`luminance`]: normalized image luminance mapped across the stack.
//! - [`enhanced`]: projection onto the polyline of layer colors in Lab space.
//!
//! Both auto-paint modes finish with [`dither::quantize`], which snaps the
//! continuous heights to the print grid with or without error diffusion.

pub mod dither;
pub mod enhanced;
pub mod luminance;
pub mod manual;

use crate::cancel::{Cancelled, Checkpoint};
use crate::crop::RasterCrop;
use crate::error::Result;
use crate::progress::Progress;
use crate::types::{AutoPaintOptions, BuildParams, ColorMatching, HeightMode};

pub use enhanced::PerceptualPolyline;
pub use manual::SwatchMapping;

/// Row-major heights in millimetres, aligned with a [`RasterCrop`].
#[derive(Debug, Clone, PartialEq)]
pub struct HeightField {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>,
}

impl HeightField {
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0.0; width as usize * height as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(y * self.width + x) as usize]
    }

    /// Largest height in the field.
    pub fn max_height(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }
}

/// Cumulative layer heights and the printer's layer grid.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStack {
    tops: Vec<f32>,
    layer_height: f32,
    first_layer_height: f32,
}

impl LayerStack {
    pub fn new(params: &BuildParams) -> Self {
        let mut tops = Vec::with_capacity(params.layers.len());
        let mut top = 0.0f32;
        for (position, layer) in params.layers.iter().enumerate() {
            let thickness = if position == 0 {
                layer.thickness_mm.max(params.first_layer_height_mm)
            } else {
                layer.thickness_mm
            };
            top += thickness;
            tops.push(top);
        }

        Self {
            tops,
            layer_height: params.layer_height_mm,
            first_layer_height: params.first_layer_height_mm,
        }
    }

    pub fn len(&self) -> usize {
        self.tops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tops.is_empty()
    }

    /// Absolute top of the layer at `position`.
    pub fn top(&self, position: usize) -> f32 {
        self.tops[position]
    }

    /// Absolute base of the layer at `position`.
    pub fn bottom(&self, position: usize) -> f32 {
        if position == 0 {
            0.0
        } else {
            self.tops[position - 1]
        }
    }

    /// Thickness after the first-layer floor.
    pub fn thickness(&self, position: usize) -> f32 {
        self.top(position) - self.bottom(position)
    }

    pub fn total_height(&self) -> f32 {
        self.tops.last().copied().unwrap_or(0.0)
    }

    pub fn first_layer_height(&self) -> f32 {
        self.first_layer_height
    }

    pub fn layer_height(&self) -> f32 {
        self.layer_height
    }

    /// Snap a height to the printer grid: whole layer steps above the first
    /// layer, clamped to `[first_layer_height, total_height]`. A zero layer
    /// height disables snapping.
    pub fn snap(&self, h: f32) -> f32 {
        if self.layer_height <= 0.0 {
            return h;
        }
        let steps = ((h - self.first_layer_height) / self.layer_height).round();
        let snapped = self.first_layer_height + steps * self.layer_height;
        snapped.clamp(self.first_layer_height, self.total_height().max(self.first_layer_height))
    }
}

/// Height algorithm resolved once per build.
#[derive(Debug, Clone)]
pub enum HeightSource {
    Manual(SwatchMapping),
    Luminance(AutoPaintOptions),
    Perceptual(PerceptualPolyline, AutoPaintOptions),
}

impl HeightSource {
    pub fn from_params(params: &BuildParams, stack: &LayerStack) -> Result<Self> {
        Ok(match params.mode {
            HeightMode::Manual => HeightSource::Manual(SwatchMapping::new(params)?),
            HeightMode::AutoPaint(options) => match options.matching {
                ColorMatching::Luminance => HeightSource::Luminance(options),
                ColorMatching::Perceptual => HeightSource::Perceptual(
                    PerceptualPolyline::new(&params.layer_colors()?, stack),
                    options,
                ),
            },
        })
    }

    /// Compute the height field for `crop`. `pixel_size_mm` is the size of one
    /// grid cell and sets the dither block size.
    pub fn build(
        &self,
        crop: &RasterCrop,
        stack: &LayerStack,
        pixel_size_mm: f32,
        checkpoint: &mut Checkpoint<'_>,
        progress: &mut Progress<'_>,
        span: (f32, f32),
    ) -> std::result::Result<HeightField, Cancelled> {
        let (start, end) = span;
        match self {
            HeightSource::Manual(mapping) => {
                manual::build(crop, mapping, stack, checkpoint, progress, span)
            }
            HeightSource::Luminance(options) => {
                let mid = start + (end - start) * 0.5;
                let continuous =
                    luminance::build(crop, stack, checkpoint, progress, (start, mid))?;
                dither::quantize(&continuous, stack, options, pixel_size_mm, checkpoint, progress, (mid, end))
            }
            HeightSource::Perceptual(polyline, options) => {
                let mid = start + (end - start) * 0.5;
                let continuous =
                    enhanced::build(crop, polyline, checkpoint, progress, (start, mid))?;
                dither::quantize(&continuous, stack, options, pixel_size_mm, checkpoint, progress, (mid, end))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LayerSpec;

    fn stack(thicknesses: &[f32], layer_height: f32, first: f32) -> LayerStack {
        let mut params = BuildParams::with_layers(
            thicknesses
                .iter()
                .enumerate()
                .map(|(i, &t)| LayerSpec::new(i, "#808080", t))
                .collect(),
        );
        params.layer_height_mm = layer_height;
        params.first_layer_height_mm = first;
        LayerStack::new(&params)
    }

    #[test]
    fn test_cumulative_tops() {
        let stack = stack(&[0.2, 0.4, 0.1], 0.1, 0.2);
        assert!((stack.top(0) - 0.2).abs() < 1e-6);
        assert!((stack.top(1) - 0.6).abs() < 1e-6);
        assert!((stack.top(2) - 0.7).abs() < 1e-6);
        assert!((stack.bottom(1) - 0.2).abs() < 1e-6);
        assert!((stack.total_height() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_first_layer_is_floored() {
        let stack = stack(&[0.05, 0.1], 0.1, 0.2);
        assert!((stack.thickness(0) - 0.2).abs() < 1e-6);
        assert!((stack.top(1) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_snap_rounds_to_grid_and_clamps() {
        let stack = stack(&[0.2, 1.0], 0.12, 0.2);
        assert!((stack.snap(0.2) - 0.2).abs() < 1e-6);
        assert!((stack.snap(0.33) - 0.32).abs() < 1e-5);
        assert!((stack.snap(0.0) - 0.2).abs() < 1e-6);
        assert!((stack.snap(5.0) - 1.2).abs() < 1e-5);
    }

    #[test]
    fn test_snap_is_idempotent() {
        let stack = stack(&[0.2, 1.0, 0.55], 0.12, 0.2);
        let mut h = 0.0f32;
        while h < 2.0 {
            let once = stack.snap(h);
            assert_eq!(stack.snap(once), once, "h = {}", h);
            h += 0.0137;
        }
    }

    #[test]
    fn test_zero_layer_height_disables_snap() {
        let stack = stack(&[0.2, 1.0], 0.0, 0.2);
        assert_eq!(stack.snap(0.4321), 0.4321);
    }
}
