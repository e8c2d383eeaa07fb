//! Auto-paint by perceptual color: project each pixel onto the path the layer
//! colors trace through Lab space as the stack rises.
//!
//! Consecutive layers with (nearly) the same color collapse into a flat zone
//! covering a height range. Pixels matching a flat zone are spread across that
//! range by their luminance, so a single-color region still carries relief.
//! Between zones, transition segments interpolate height linearly along the
//! straight Lab line joining the two zone colors.

use super::luminance::LuminanceRange;
use super::{HeightField, LayerStack};
use crate::cancel::{Cancelled, Checkpoint};
use crate::crop::RasterCrop;
use crate::progress::Progress;
use crate::types::color::{luminance, srgb_to_lab};
use crate::types::Rgb;
use glam::Vec3;
use std::collections::HashMap;

/// Lab distance under which consecutive layers count as the same color.
pub const FLAT_ZONE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
struct FlatZone {
    lab: Vec3,
    min_height: f32,
    max_height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Transition {
    start: Vec3,
    end: Vec3,
    start_height: f32,
    end_height: f32,
}

impl Transition {
    /// Distance from `lab` to the segment and the height at the closest point.
    fn project(&self, lab: Vec3) -> (f32, f32) {
        let dir = self.end - self.start;
        let len_sq = dir.length_squared();
        let t = if len_sq > 0.0 {
            ((lab - self.start).dot(dir) / len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let closest = self.start + dir * t;
        let height = self.start_height + (self.end_height - self.start_height) * t;
        (lab.distance(closest), height)
    }
}

/// Flat zones and transitions built from the layer colors, bottom first.
#[derive(Debug, Clone, PartialEq)]
pub struct PerceptualPolyline {
    zones: Vec<FlatZone>,
    transitions: Vec<Transition>,
    min_height: f32,
    max_height: f32,
}

impl PerceptualPolyline {
    pub fn new(layer_colors: &[Rgb], stack: &LayerStack) -> Self {
        let mut zones: Vec<FlatZone> = Vec::new();
        // (sum of Lab, count) for the zone being grown.
        let mut run: Option<(Vec3, f32)> = None;
        let mut previous: Option<Vec3> = None;

        for (position, &color) in layer_colors.iter().enumerate() {
            let lab = srgb_to_lab(color);
            let top = stack.top(position);
            let same_zone =
                matches!(previous, Some(p) if p.distance(lab) < FLAT_ZONE_THRESHOLD);

            let extended = match (zones.last_mut(), run.as_mut()) {
                (Some(zone), Some((sum, count))) if same_zone => {
                    *sum += lab;
                    *count += 1.0;
                    zone.lab = *sum / *count;
                    zone.max_height = top;
                    true
                }
                _ => false,
            };
            if !extended {
                zones.push(FlatZone {
                    lab,
                    min_height: top,
                    max_height: top,
                });
                run = Some((lab, 1.0));
            }
            previous = Some(lab);
        }

        let transitions = zones
            .windows(2)
            .map(|pair| Transition {
                start: pair[0].lab,
                end: pair[1].lab,
                start_height: pair[0].max_height,
                end_height: pair[1].min_height,
            })
            .collect();

        let min_height = if stack.is_empty() { 0.0 } else { stack.top(0) };
        Self {
            zones,
            transitions,
            min_height,
            max_height: stack.total_height(),
        }
    }

    /// Number of flat zones after collapsing.
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Height for a pixel color. `relief` is the pixel's normalized luminance,
    /// used to place it inside a flat zone's height range.
    pub fn height_for(&self, lab: Vec3, relief: f32) -> f32 {
        let mut best_distance = f32::INFINITY;
        let mut best_height = self.min_height;

        for zone in &self.zones {
            let distance = lab.distance(zone.lab);
            if distance < best_distance {
                best_distance = distance;
                best_height = zone.min_height + relief * (zone.max_height - zone.min_height);
            }
        }
        for transition in &self.transitions {
            let (distance, height) = transition.project(lab);
            if distance < best_distance {
                best_distance = distance;
                best_height = height;
            }
        }

        best_height.clamp(self.min_height, self.max_height.max(self.min_height))
    }
}

/// Continuous (unsnapped) perceptual heights.
pub fn build(
    crop: &RasterCrop,
    polyline: &PerceptualPolyline,
    checkpoint: &mut Checkpoint<'_>,
    progress: &mut Progress<'_>,
    span: (f32, f32),
) -> Result<HeightField, Cancelled> {
    let mut field = HeightField::zeros(crop.width, crop.height);
    let Some(range) = LuminanceRange::scan(crop) else {
        return Ok(field);
    };
    // Keyed by RGB: the Lab conversion and projection are the expensive part.
    let mut cache: HashMap<Rgb, f32> = HashMap::new();

    for y in 0..crop.height {
        checkpoint.tick()?;
        let row_start = (y * crop.width) as usize;
        for x in 0..crop.width as usize {
            let index = row_start + x;
            if !crop.is_opaque(index) {
                continue;
            }
            let rgb = crop.rgb(index);
            field.values[index] = *cache.entry(rgb).or_insert_with(|| {
                polyline.height_for(srgb_to_lab(rgb), range.normalize(luminance(rgb)))
            });
        }
        progress.report_stage(span.0, span.1, y as usize + 1, crop.height as usize);
    }

    Ok(field)
}
