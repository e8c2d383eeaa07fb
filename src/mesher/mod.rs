//! Mesh generation from a palette-reduced image.
//!
//! [`StackMesher`] runs the whole pipeline for one parameter set: crop to
//! the opaque bounds, synthesize heights, segment the height field into one
//! occupancy mask per layer and turn each mask into a welded slab. Layer
//! `i`'s slab spans the cumulative height range of layer `i`, so slabs stack
//! flush and a pixel that reaches layer `j` is solid through every layer
//! below it.

pub mod geometry;
pub mod greedy;
pub mod solid;

pub use geometry::MeshBuffer;
pub use greedy::{decompose, CellRect};
pub use solid::{build_slab, SlabParams};

use crate::cancel::{Cancelled, Checkpoint};
use crate::crop::{CropBounds, RasterCrop};
use crate::error::Result;
use crate::height::{HeightSource, LayerStack};
use crate::progress::Progress;
use crate::segment::{layer_mask, meshable_layers};
use crate::types::{BoundingBox, BuildParams, Rgb};
use image::RgbaImage;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, info};

// Share of overall progress at the end of each stage.
const CROP_DONE: f32 = 0.05;
const HEIGHTS_DONE: f32 = 0.4;

/// The solid for one layer of the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMesh {
    /// Position in the stack, bottom first.
    pub layer_index: usize,
    pub swatch_index: usize,
    /// Display color.
    pub color: Rgb,
    /// Base of the slab in model space.
    pub z_min: f32,
    /// Top of the slab in model space.
    pub z_max: f32,
    pub mesh: MeshBuffer,
}

/// Output of a completed build: one mesh per non-empty layer.
#[derive(Debug, Clone, PartialEq)]
pub struct StackModel {
    pub layers: Vec<LayerMesh>,
    /// Region of the source image that was meshed.
    pub crop: CropBounds,
    /// Source pixels per grid cell along each axis.
    pub step: u32,
    /// Edge length of one grid cell in millimetres.
    pub pixel_size_mm: f32,
    /// Hash of the image and parameters this model was built from.
    pub fingerprint: u64,
}

impl StackModel {
    pub fn total_vertices(&self) -> usize {
        self.layers.iter().map(|l| l.mesh.vertex_count()).sum()
    }

    pub fn total_triangles(&self) -> usize {
        self.layers.iter().map(|l| l.mesh.triangle_count()).sum()
    }

    /// Bounds over all layers, `None` for an empty model.
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.layers
            .iter()
            .filter_map(|l| l.mesh.bounds())
            .reduce(|a, b| {
                BoundingBox::new(
                    [a.min[0].min(b.min[0]), a.min[1].min(b.min[1]), a.min[2].min(b.min[2])],
                    [a.max[0].max(b.max[0]), a.max[1].max(b.max[1]), a.max[2].max(b.max[2])],
                )
            })
    }
}

/// Result of a build that may be superseded before it finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome<T> {
    Completed(T),
    /// A newer build took over; nothing was produced.
    Cancelled,
}

impl<T> BuildOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildOutcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            BuildOutcome::Completed(value) => Some(value),
            BuildOutcome::Cancelled => None,
        }
    }
}

/// Grid resolution requested for a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    /// Coarse grid of roughly `pixel_target` cells for quick feedback.
    Preview { pixel_target: u64 },
    /// One cell per pixel, unless the crop exceeds `pixel_limit`.
    Full { pixel_limit: u64 },
}

impl Detail {
    /// Source pixels per grid cell for a crop of `area` pixels.
    pub fn step(&self, area: u64) -> u32 {
        match *self {
            Detail::Preview { pixel_target } => adaptive_step(area, pixel_target),
            Detail::Full { pixel_limit } => adaptive_step(area, pixel_limit),
        }
    }
}

impl Default for Detail {
    fn default() -> Self {
        Detail::Full {
            pixel_limit: u64::MAX,
        }
    }
}

/// Smallest step that brings `area` down to at most about `limit` cells.
pub fn adaptive_step(area: u64, limit: u64) -> u32 {
    if limit == 0 || area <= limit {
        return 1;
    }
    ((area as f64 / limit as f64).sqrt().ceil() as u32).max(1)
}

/// 64-bit hash of everything a build depends on.
pub fn fingerprint(image: &RgbaImage, params: &BuildParams) -> Result<u64> {
    let mut hasher = DefaultHasher::new();
    image.dimensions().hash(&mut hasher);
    image.as_raw().hash(&mut hasher);
    serde_json::to_vec(params)?.hash(&mut hasher);
    Ok(hasher.finish())
}

/// Pipeline for one validated parameter set.
#[derive(Debug, Clone)]
pub struct StackMesher {
    params: BuildParams,
    stack: LayerStack,
    source: HeightSource,
    colors: Vec<Rgb>,
}

impl StackMesher {
    /// Validate `params` and resolve the height algorithm.
    pub fn new(params: BuildParams) -> Result<Self> {
        params.validate()?;
        let stack = LayerStack::new(&params);
        let source = HeightSource::from_params(&params, &stack)?;
        let colors = params.layer_colors()?;
        Ok(Self {
            params,
            stack,
            source,
            colors,
        })
    }

    pub fn params(&self) -> &BuildParams {
        &self.params
    }

    pub fn stack(&self) -> &LayerStack {
        &self.stack
    }

    /// Build every layer mesh for `image`.
    ///
    /// Errors are input errors; a superseded build returns
    /// [`BuildOutcome::Cancelled`] and discards its partial buffers.
    pub fn build(
        &self,
        image: &RgbaImage,
        detail: Detail,
        checkpoint: &mut Checkpoint<'_>,
        progress: &mut Progress<'_>,
    ) -> Result<BuildOutcome<StackModel>> {
        let fingerprint = fingerprint(image, &self.params)?;
        let crop = RasterCrop::from_image(image)?;
        let step = detail.step(crop.bounds.area());
        if step > 1 {
            debug!(
                "Resampling {}x{} crop with step {} ({:?})",
                crop.width, crop.height, step, detail
            );
        }
        let crop = crop.resample(step);
        progress.report(CROP_DONE);

        let layers = match self.mesh_layers(&crop, checkpoint, progress) {
            Ok(layers) => layers,
            Err(Cancelled) => {
                debug!("Build {} superseded", checkpoint.token().id());
                return Ok(BuildOutcome::Cancelled);
            }
        };
        progress.report(1.0);

        let model = StackModel {
            layers,
            crop: crop.bounds,
            step: crop.step,
            pixel_size_mm: self.params.pixel_size_mm * crop.step as f32,
            fingerprint,
        };
        info!(
            "Built {} layer meshes on a {}x{} grid: {} vertices, {} triangles",
            model.layers.len(),
            crop.width,
            crop.height,
            model.total_vertices(),
            model.total_triangles()
        );
        Ok(BuildOutcome::Completed(model))
    }

    fn mesh_layers(
        &self,
        crop: &RasterCrop,
        checkpoint: &mut Checkpoint<'_>,
        progress: &mut Progress<'_>,
    ) -> std::result::Result<Vec<LayerMesh>, Cancelled> {
        let cell_size = self.params.pixel_size_mm * crop.step as f32;
        let scale = self.params.height_scale_factor;
        let field = self.source.build(
            crop,
            &self.stack,
            cell_size,
            checkpoint,
            progress,
            (CROP_DONE, HEIGHTS_DONE),
        )?;
        debug!("Height field ready, max height {:.3} mm", field.max_height());

        let positions: Vec<usize> = meshable_layers(&self.stack).collect();
        let mut layers = Vec::with_capacity(positions.len());
        for (done, &position) in positions.iter().enumerate() {
            let mask = layer_mask(&field, self.stack.top(position), checkpoint)?;
            if !mask.is_empty() {
                let slab = SlabParams {
                    cell_size,
                    z_bottom: self.stack.bottom(position),
                    z_top: self.stack.top(position),
                    height_scale: scale,
                };
                let mesh = build_slab(&mask, slab, checkpoint)?;
                debug!(
                    "Layer {}: {} cells, {} vertices, {} triangles",
                    position,
                    mask.active_count(),
                    mesh.vertex_count(),
                    mesh.triangle_count()
                );
                layers.push(LayerMesh {
                    layer_index: position,
                    swatch_index: self.params.layers[position].swatch_index,
                    color: self.colors[position],
                    z_min: slab.z_bottom * scale,
                    z_max: slab.z_top * scale,
                    mesh,
                });
            }
            progress.report_stage(HEIGHTS_DONE, 1.0, done + 1, positions.len());
        }

        // Nothing is handed out unless the token is still live at the end.
        checkpoint.verify()?;
        Ok(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{ManualClock, TokenSource};
    use crate::types::{AutoPaintOptions, ColorMatching, LayerSpec};
    use image::Rgba;
    use std::time::Duration;

    fn image(rows: &[&[[u8; 4]]]) -> RgbaImage {
        let mut img = RgbaImage::new(rows[0].len() as u32, rows.len() as u32);
        for (y, row) in rows.iter().enumerate() {
            for (x, px) in row.iter().enumerate() {
                img.put_pixel(x as u32, y as u32, Rgba(*px));
            }
        }
        img
    }

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];
    const CLEAR: [u8; 4] = [0, 0, 0, 0];

    fn two_layer_params() -> BuildParams {
        let mut params = BuildParams::with_layers(vec![
            LayerSpec::new(0, "#ff0000", 0.2),
            LayerSpec::new(1, "#0000ff", 0.4),
        ]);
        params.pixel_size_mm = 1.0;
        params
    }

    fn build(mesher: &StackMesher, img: &RgbaImage) -> StackModel {
        mesher
            .build(img, Detail::default(), &mut Checkpoint::unbounded(), &mut Progress::silent())
            .unwrap()
            .completed()
            .unwrap()
    }

    #[test]
    fn test_single_layer_square() {
        let mut params = BuildParams::with_layers(vec![LayerSpec::new(0, "#ff0000", 0.2)]);
        params.pixel_size_mm = 1.0;
        let mesher = StackMesher::new(params).unwrap();
        let model = build(&mesher, &image(&[&[RED, RED], &[RED, RED]]));

        assert_eq!(model.layers.len(), 1);
        let mesh = &model.layers[0].mesh;
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.triangle_count(), 12);
        let bounds = model.bounds().unwrap();
        assert_eq!(bounds.min, [0.0, 0.0, 0.0]);
        assert!((bounds.max[2] - 0.2).abs() < 1e-6);
        assert_eq!([bounds.max[0], bounds.max[1]], [2.0, 2.0]);
    }

    #[test]
    fn test_manual_upper_layer_is_nested() {
        let mesher = StackMesher::new(two_layer_params()).unwrap();
        let model = build(&mesher, &image(&[&[RED, BLUE]]));

        assert_eq!(model.layers.len(), 2);
        let base = &model.layers[0];
        let upper = &model.layers[1];
        assert_eq!(base.color, [255, 0, 0]);
        assert_eq!(upper.color, [0, 0, 255]);

        // Both pixels are solid in the base; only the blue one reaches 0.6.
        let base_bounds = base.mesh.bounds().unwrap();
        assert_eq!([base_bounds.min[0], base_bounds.max[0]], [0.0, 2.0]);
        let upper_bounds = upper.mesh.bounds().unwrap();
        assert_eq!([upper_bounds.min[0], upper_bounds.max[0]], [1.0, 2.0]);
        assert!((upper_bounds.max[2] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_layers_stack_flush() {
        let mesher = StackMesher::new(two_layer_params()).unwrap();
        let model = build(&mesher, &image(&[&[BLUE, BLUE]]));
        assert_eq!(model.layers[0].z_max, model.layers[1].z_min);
        assert_eq!(
            model.layers[0].mesh.bounds().unwrap().max[2],
            model.layers[1].mesh.bounds().unwrap().min[2]
        );
    }

    #[test]
    fn test_empty_layers_are_skipped() {
        let mesher = StackMesher::new(two_layer_params()).unwrap();
        let model = build(&mesher, &image(&[&[RED, RED]]));
        assert_eq!(model.layers.len(), 1);
        assert_eq!(model.layers[0].layer_index, 0);
    }

    #[test]
    fn test_transparent_margin_is_cropped() {
        let mesher = StackMesher::new(two_layer_params()).unwrap();
        let model = build(&mesher, &image(&[&[CLEAR, CLEAR, CLEAR], &[CLEAR, RED, CLEAR]]));
        assert_eq!(
            model.crop,
            CropBounds {
                min_x: 1,
                min_y: 1,
                width: 1,
                height: 1
            }
        );
        assert_eq!(model.layers[0].mesh.vertex_count(), 8);
    }

    #[test]
    fn test_rebuild_is_identical() {
        let params = two_layer_params().with_auto_paint(AutoPaintOptions {
            matching: ColorMatching::Perceptual,
            dithering: true,
            dither_line_width_mm: 2.0,
        });
        let mesher = StackMesher::new(params).unwrap();
        let mut rows = Vec::new();
        for y in 0..6u8 {
            rows.push((0..6u8).map(|x| [x * 40, y * 40, 128, 255]).collect::<Vec<_>>());
        }
        let row_refs: Vec<&[[u8; 4]]> = rows.iter().map(Vec::as_slice).collect();
        let img = image(&row_refs);

        let first = build(&mesher, &img);
        let second = build(&mesher, &img);
        assert_eq!(first, second);
        for (a, b) in first.layers.iter().zip(&second.layers) {
            assert_eq!(a.mesh.positions, b.mesh.positions);
            assert_eq!(a.mesh.indices, b.mesh.indices);
        }
    }

    #[test]
    fn test_preview_is_coarser() {
        let mesher = StackMesher::new(two_layer_params()).unwrap();
        let img = RgbaImage::from_pixel(40, 40, Rgba(RED));
        let model = mesher
            .build(
                &img,
                Detail::Preview { pixel_target: 100 },
                &mut Checkpoint::unbounded(),
                &mut Progress::silent(),
            )
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(model.step, 4);
        assert_eq!(model.pixel_size_mm, 4.0);
        let bounds = model.bounds().unwrap();
        assert_eq!([bounds.max[0], bounds.max[1]], [40.0, 40.0]);
    }

    #[test]
    fn test_adaptive_step() {
        assert_eq!(adaptive_step(100, 250_000), 1);
        assert_eq!(adaptive_step(1_000_000, 250_000), 2);
        assert_eq!(adaptive_step(1_000_001, 250_000), 3);
        assert_eq!(adaptive_step(5, 0), 1);
    }

    #[test]
    fn test_superseded_build_is_cancelled() {
        let mesher = StackMesher::new(two_layer_params()).unwrap();
        let img = RgbaImage::from_pixel(8, 8, Rgba(BLUE));

        let clock = ManualClock::new();
        let tokens = TokenSource::new();
        let token = tokens.issue();
        let hook_tokens = tokens.clone();
        let hook_clock = clock.clone();
        let mut hook = move || {
            hook_clock.advance(Duration::from_millis(1));
            hook_tokens.supersede();
        };
        let mut checkpoint =
            Checkpoint::new(token, &tokens, &clock, Duration::ZERO).with_yield(&mut hook);

        let outcome = mesher
            .build(&img, Detail::default(), &mut checkpoint, &mut Progress::silent())
            .unwrap();
        assert!(outcome.is_cancelled());
    }

    #[test]
    fn test_progress_is_monotonic_and_finishes() {
        let mesher = StackMesher::new(two_layer_params()).unwrap();
        let img = image(&[&[RED, BLUE], &[BLUE, RED]]);
        let mut seen = Vec::new();
        let mut sink = |v: f32| seen.push(v);
        mesher
            .build(
                &img,
                Detail::default(),
                &mut Checkpoint::unbounded(),
                &mut Progress::new(Some(&mut sink)),
            )
            .unwrap();

        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(1.0));
    }

    #[test]
    fn test_zero_size_image_is_an_error() {
        let mesher = StackMesher::new(two_layer_params()).unwrap();
        let result = mesher.build(
            &RgbaImage::new(0, 0),
            Detail::default(),
            &mut Checkpoint::unbounded(),
            &mut Progress::silent(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_fingerprint_tracks_inputs() {
        let img = image(&[&[RED, BLUE]]);
        let params = two_layer_params();
        let a = fingerprint(&img, &params).unwrap();
        assert_eq!(a, fingerprint(&img, &params).unwrap());

        let mut changed = params.clone();
        changed.layers[1].thickness_mm = 0.5;
        assert_ne!(a, fingerprint(&img, &changed).unwrap());
        assert_ne!(a, fingerprint(&image(&[&[BLUE, RED]]), &params).unwrap());
    }
}
