//! Pass 2 of auto-paint: snap continuous heights to the print grid.
//!
//! Without dithering every pixel rounds independently. With dithering the
//! image is cut into square blocks one dither line wide and the quantization
//! error of each block's mean height is diffused to its neighbours
//! (Floyd–Steinberg, serpentine). Pixels on a snapped-height boundary keep
//! their own rounding and their blocks take no diffused error, so colour
//! boundaries never grow one-pixel notches.

use super::{HeightField, LayerStack};
use crate::cancel::{Cancelled, Checkpoint};
use crate::progress::Progress;
use crate::types::AutoPaintOptions;

/// Side of a dither block in grid cells.
pub fn block_size(dither_line_width_mm: f32, pixel_size_mm: f32) -> u32 {
    if pixel_size_mm <= 0.0 {
        return 1;
    }
    ((dither_line_width_mm / pixel_size_mm).round() as u32).max(1)
}

pub fn quantize(
    continuous: &HeightField,
    stack: &LayerStack,
    options: &AutoPaintOptions,
    pixel_size_mm: f32,
    checkpoint: &mut Checkpoint<'_>,
    progress: &mut Progress<'_>,
    span: (f32, f32),
) -> Result<HeightField, Cancelled> {
    let snapped = snap_each(continuous, stack, checkpoint)?;
    if !options.dithering {
        progress.report(span.1);
        return Ok(snapped);
    }

    let (width, height) = (continuous.width as usize, continuous.height as usize);
    let edges = edge_map(&snapped, checkpoint)?;
    let block = block_size(options.dither_line_width_mm, pixel_size_mm) as usize;
    let blocks_x = width.div_ceil(block);
    let blocks_y = height.div_ceil(block);

    // Mean continuous height and edge flag per block, over material pixels only.
    let mut sums = vec![0.0f32; blocks_x * blocks_y];
    let mut counts = vec![0u32; blocks_x * blocks_y];
    let mut has_edge = vec![false; blocks_x * blocks_y];
    for y in 0..height {
        checkpoint.tick()?;
        for x in 0..width {
            let index = y * width + x;
            let h = continuous.values[index];
            if h <= 0.0 {
                continue;
            }
            let b = (y / block) * blocks_x + x / block;
            sums[b] += h;
            counts[b] += 1;
            has_edge[b] |= edges[index];
        }
    }

    let mut errors = vec![0.0f32; blocks_x * blocks_y];
    let mut levels = vec![0.0f32; blocks_x * blocks_y];
    for by in 0..blocks_y {
        checkpoint.tick()?;
        let forward: isize = if by % 2 == 0 { 1 } else { -1 };
        for i in 0..blocks_x {
            let bx = if forward > 0 { i } else { blocks_x - 1 - i };
            let b = by * blocks_x + bx;
            if counts[b] == 0 {
                continue;
            }
            let mean = sums[b] / counts[b] as f32;
            if has_edge[b] {
                levels[b] = stack.snap(mean);
                continue;
            }

            let value = mean + errors[b];
            let level = stack.snap(value);
            levels[b] = level;
            let error = value - level;

            let bx = bx as isize;
            let mut spread = |dx: isize, dy: usize, weight: f32| {
                let nx = bx + dx;
                let ny = by + dy;
                if nx >= 0 && (nx as usize) < blocks_x && ny < blocks_y {
                    errors[ny * blocks_x + nx as usize] += error * weight;
                }
            };
            spread(forward, 0, 7.0 / 16.0);
            spread(-forward, 1, 3.0 / 16.0);
            spread(0, 1, 5.0 / 16.0);
            spread(forward, 1, 1.0 / 16.0);
        }
        progress.report_stage(span.0, span.1, by + 1, blocks_y);
    }

    let mut field = HeightField::zeros(continuous.width, continuous.height);
    for y in 0..height {
        for x in 0..width {
            let index = y * width + x;
            if snapped.values[index] <= 0.0 {
                continue;
            }
            field.values[index] = if edges[index] {
                snapped.values[index]
            } else {
                levels[(y / block) * blocks_x + x / block]
            };
        }
    }

    Ok(field)
}

/// Per-pixel rounding; empty pixels stay empty.
fn snap_each(
    continuous: &HeightField,
    stack: &LayerStack,
    checkpoint: &mut Checkpoint<'_>,
) -> Result<HeightField, Cancelled> {
    let mut field = HeightField::zeros(continuous.width, continuous.height);
    for (row_out, row_in) in field
        .values
        .chunks_mut(continuous.width.max(1) as usize)
        .zip(continuous.values.chunks(continuous.width.max(1) as usize))
    {
        checkpoint.tick()?;
        for (out, &h) in row_out.iter_mut().zip(row_in) {
            if h > 0.0 {
                *out = stack.snap(h);
            }
        }
    }
    Ok(field)
}

/// Material pixels whose snapped height differs from a 4-neighbour's.
/// Neighbours outside the grid are ignored; empty neighbours count as 0.
pub fn edge_map(
    snapped: &HeightField,
    checkpoint: &mut Checkpoint<'_>,
) -> Result<Vec<bool>, Cancelled> {
    let (width, height) = (snapped.width as usize, snapped.height as usize);
    let mut edges = vec![false; width * height];
    for y in 0..height {
        checkpoint.tick()?;
        for x in 0..width {
            let index = y * width + x;
            let h = snapped.values[index];
            if h <= 0.0 {
                continue;
            }
            let differs = |nx: usize, ny: usize| snapped.values[ny * width + nx] != h;
            edges[index] = (x > 0 && differs(x - 1, y))
                || (x + 1 < width && differs(x + 1, y))
                || (y > 0 && differs(x, y - 1))
                || (y + 1 < height && differs(x, y + 1));
        }
    }
    Ok(edges)
}
