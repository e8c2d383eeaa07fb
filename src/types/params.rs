//! Build parameters: layer order, print grid and height mode.

use super::color::{parse_hex, Rgb};
use crate::error::{MesherError, Result};
use serde::{Deserialize, Serialize};

/// One stacked color band. Position in [`BuildParams::layers`] is the stack
/// order; index 0 is printed first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Index of the palette swatch this layer prints.
    pub swatch_index: usize,
    /// Display/filament color, `#rrggbb`.
    pub color_hex: String,
    /// Band thickness in millimetres. The first layer is floored at
    /// [`BuildParams::first_layer_height_mm`].
    pub thickness_mm: f32,
}

impl LayerSpec {
    pub fn new(swatch_index: usize, color_hex: impl Into<String>, thickness_mm: f32) -> Self {
        Self {
            swatch_index,
            color_hex: color_hex.into(),
            thickness_mm,
        }
    }

    /// Parsed display color.
    pub fn color(&self) -> Result<Rgb> {
        parse_hex(&self.color_hex)
    }
}

/// How auto-paint maps pixel colors onto the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMatching {
    /// Height follows image luminance.
    #[default]
    Luminance,
    /// Height follows the pixel's projection onto the layer colors' Lab polyline.
    Perceptual,
}

/// Options for the continuous auto-paint height modes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoPaintOptions {
    #[serde(default)]
    pub matching: ColorMatching,
    /// Diffuse quantization error across blocks instead of rounding per pixel.
    #[serde(default)]
    pub dithering: bool,
    /// Printed width of one dither dot.
    #[serde(default = "default_dither_line_width")]
    pub dither_line_width_mm: f32,
}

fn default_dither_line_width() -> f32 {
    0.42
}

impl Default for AutoPaintOptions {
    fn default() -> Self {
        Self {
            matching: ColorMatching::default(),
            dithering: false,
            dither_line_width_mm: default_dither_line_width(),
        }
    }
}

/// Height-field algorithm, chosen once per build.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeightMode {
    /// Each pixel takes the cumulative height of its nearest swatch's layer.
    #[default]
    Manual,
    /// Continuous gradient snapped to the print grid.
    AutoPaint(AutoPaintOptions),
}

/// Every input to one build besides the image itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildParams {
    /// Stack order, bottom first.
    pub layers: Vec<LayerSpec>,
    /// Palette swatches as hex. When empty, swatches come from the layers.
    #[serde(default)]
    pub palette: Vec<String>,
    #[serde(default = "default_layer_height")]
    pub layer_height_mm: f32,
    #[serde(default = "default_first_layer_height")]
    pub first_layer_height_mm: f32,
    #[serde(default = "default_pixel_size")]
    pub pixel_size_mm: f32,
    #[serde(default = "default_height_scale")]
    pub height_scale_factor: f32,
    #[serde(default)]
    pub mode: HeightMode,
}

fn default_layer_height() -> f32 {
    0.08
}

fn default_first_layer_height() -> f32 {
    0.2
}

fn default_pixel_size() -> f32 {
    0.2
}

fn default_height_scale() -> f32 {
    1.0
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            palette: Vec::new(),
            layer_height_mm: default_layer_height(),
            first_layer_height_mm: default_first_layer_height(),
            pixel_size_mm: default_pixel_size(),
            height_scale_factor: default_height_scale(),
            mode: HeightMode::default(),
        }
    }
}

impl BuildParams {
    /// Create params with the given layer order and default print settings.
    pub fn with_layers(layers: Vec<LayerSpec>) -> Self {
        Self {
            layers,
            ..Self::default()
        }
    }

    /// Switch to auto-paint with the given options.
    pub fn with_auto_paint(mut self, options: AutoPaintOptions) -> Self {
        self.mode = HeightMode::AutoPaint(options);
        self
    }

    /// Load params from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    /// Check ranges and colors before a build starts.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(MesherError::InvalidParams(msg));

        if self.layers.is_empty() {
            return invalid("at least one layer is required".into());
        }
        if !(self.pixel_size_mm.is_finite() && self.pixel_size_mm > 0.0) {
            return invalid(format!("pixel size must be positive, got {}", self.pixel_size_mm));
        }
        if !(self.height_scale_factor.is_finite() && self.height_scale_factor > 0.0) {
            return invalid(format!(
                "height scale must be positive, got {}",
                self.height_scale_factor
            ));
        }
        for (name, value) in [
            ("layer height", self.layer_height_mm),
            ("first layer height", self.first_layer_height_mm),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{} must be non-negative, got {}", name, value));
            }
        }
        if let HeightMode::AutoPaint(options) = self.mode {
            if options.dithering
                && !(options.dither_line_width_mm.is_finite() && options.dither_line_width_mm > 0.0)
            {
                return invalid(format!(
                    "dither line width must be positive, got {}",
                    options.dither_line_width_mm
                ));
            }
        }

        for (position, layer) in self.layers.iter().enumerate() {
            if !(layer.thickness_mm.is_finite() && layer.thickness_mm >= 0.0) {
                return invalid(format!(
                    "layer {} thickness must be non-negative, got {}",
                    position, layer.thickness_mm
                ));
            }
            layer.color()?;
            if !self.palette.is_empty() && layer.swatch_index >= self.palette.len() {
                return invalid(format!(
                    "layer {} references swatch {} but the palette has {} colors",
                    position,
                    layer.swatch_index,
                    self.palette.len()
                ));
            }
        }
        for hex in &self.palette {
            parse_hex(hex)?;
        }

        Ok(())
    }

    /// Palette swatches as `(swatch_index, color)` pairs.
    pub fn swatches(&self) -> Result<Vec<(usize, Rgb)>> {
        if self.palette.is_empty() {
            self.layers
                .iter()
                .map(|layer| Ok((layer.swatch_index, layer.color()?)))
                .collect()
        } else {
            self.palette
                .iter()
                .enumerate()
                .map(|(index, hex)| Ok((index, parse_hex(hex)?)))
                .collect()
        }
    }

    /// Layer colors in stack order.
    pub fn layer_colors(&self) -> Result<Vec<Rgb>> {
        self.layers.iter().map(LayerSpec::color).collect()
    }
}
