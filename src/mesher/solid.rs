//! Watertight slab for one layer mask.
//!
//! The mask is covered by greedy rectangles. Every rectangle corner, and every
//! end of a boundary wall run, becomes a *required point* on the horizontal
//! and vertical grid lines through it. Caps and walls are then split at every
//! required point that falls on their edges, so two faces sharing an edge
//! always share all of its vertices and no T-junction can open a crack.
//!
//! Vertices are welded per grid point through two dense index tables (top and
//! bottom surface) that live only for the duration of one slab build.

use super::geometry::MeshBuffer;
use super::greedy::{decompose, CellRect};
use crate::cancel::{Cancelled, Checkpoint};
use crate::segment::OccupancyMask;

const NO_VERTEX: u32 = u32::MAX;

/// Placement of one slab in model space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlabParams {
    /// Edge length of one mask cell in millimetres.
    pub cell_size: f32,
    /// Base of the slab before height scaling.
    pub z_bottom: f32,
    /// Top of the slab before height scaling.
    pub z_top: f32,
    pub height_scale: f32,
}

impl SlabParams {
    pub fn thickness(&self) -> f32 {
        self.z_top - self.z_bottom
    }
}

/// Direction a wall's outward normal points. North is toward image row 0,
/// which is +Y in model space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Facing {
    North,
    South,
    West,
    East,
}

impl Facing {
    fn is_horizontal(self) -> bool {
        matches!(self, Facing::North | Facing::South)
    }
}

/// A maximal run of same-facing unit wall edges along one grid line.
#[derive(Debug, Clone, Copy)]
struct WallRun {
    facing: Facing,
    line: u32,
    start: u32,
    end: u32,
}

/// Build a closed, outward-wound solid for `mask`. Empty masks give an empty
/// buffer.
pub fn build_slab(
    mask: &OccupancyMask,
    params: SlabParams,
    checkpoint: &mut Checkpoint<'_>,
) -> Result<MeshBuffer, Cancelled> {
    if mask.is_empty() {
        return Ok(MeshBuffer::new());
    }

    let rects = decompose(mask, checkpoint)?;
    let walls = scan_walls(mask, checkpoint)?;

    let mut builder = SlabBuilder::new(mask, params);
    for rect in &rects {
        builder.require(rect.x, rect.y);
        builder.require(rect.x_end(), rect.y);
        builder.require(rect.x, rect.y_end());
        builder.require(rect.x_end(), rect.y_end());
    }
    for run in &walls {
        let (a, b) = if run.facing.is_horizontal() {
            ((run.start, run.line), (run.end, run.line))
        } else {
            ((run.line, run.start), (run.line, run.end))
        };
        builder.require(a.0, a.1);
        builder.require(b.0, b.1);
    }
    builder.seal_required_points();

    for rect in &rects {
        checkpoint.tick()?;
        builder.emit_caps(rect);
    }
    for run in &walls {
        checkpoint.tick()?;
        builder.emit_wall(run);
    }

    Ok(builder.mesh)
}

struct SlabBuilder<'m> {
    mask: &'m OccupancyMask,
    params: SlabParams,
    mesh: MeshBuffer,
    top: Vec<u32>,
    bottom: Vec<u32>,
    /// Required x coordinates, per horizontal grid line.
    row_points: Vec<Vec<u32>>,
    /// Required y coordinates, per vertical grid line.
    column_points: Vec<Vec<u32>>,
}

impl<'m> SlabBuilder<'m> {
    fn new(mask: &'m OccupancyMask, params: SlabParams) -> Self {
        let grid_points = (mask.width as usize + 1) * (mask.height as usize + 1);
        Self {
            mask,
            params,
            mesh: MeshBuffer::new(),
            top: vec![NO_VERTEX; grid_points],
            bottom: vec![NO_VERTEX; grid_points],
            row_points: vec![Vec::new(); mask.height as usize + 1],
            column_points: vec![Vec::new(); mask.width as usize + 1],
        }
    }

    fn require(&mut self, gx: u32, gy: u32) {
        self.row_points[gy as usize].push(gx);
        self.column_points[gx as usize].push(gy);
    }

    fn seal_required_points(&mut self) {
        for points in self.row_points.iter_mut().chain(self.column_points.iter_mut()) {
            points.sort_unstable();
            points.dedup();
        }
    }

    /// Welded vertex at grid point `(gx, gy)` on the top or bottom surface.
    fn vertex(&mut self, gx: u32, gy: u32, top: bool) -> u32 {
        let key = gy as usize * (self.mask.width as usize + 1) + gx as usize;
        let slot = if top {
            &mut self.top[key]
        } else {
            &mut self.bottom[key]
        };
        if *slot == NO_VERTEX {
            let p = &self.params;
            let z = if top { p.z_top } else { p.z_bottom } * p.height_scale;
            *slot = self.mesh.add_vertex([
                gx as f32 * p.cell_size,
                (self.mask.height - gy) as f32 * p.cell_size,
                z,
            ]);
        }
        *slot
    }

    /// Top and bottom caps of one rectangle.
    ///
    /// The perimeter is cut along the TL-BR diagonal into two halves, each a
    /// right angle with required points on its legs. Each half is triangulated
    /// by zipping outward from its corner, which never produces a degenerate
    /// triangle even when a leg carries many collinear points.
    fn emit_caps(&mut self, rect: &CellRect) {
        let (x0, y0, x1, y1) = (rect.x, rect.y, rect.x_end(), rect.y_end());

        // TL, down the left edge, BL, along the bottom edge, BR.
        let mut lower = vec![(x0, y0)];
        lower.extend(between(&self.column_points[x0 as usize], y0, y1).iter().map(|&y| (x0, y)));
        let lower_corner = lower.len();
        lower.push((x0, y1));
        lower.extend(between(&self.row_points[y1 as usize], x0, x1).iter().map(|&x| (x, y1)));
        lower.push((x1, y1));

        // BR, up the right edge, TR, back along the top edge, TL.
        let mut upper = vec![(x1, y1)];
        upper.extend(
            between(&self.column_points[x1 as usize], y0, y1)
                .iter()
                .rev()
                .map(|&y| (x1, y)),
        );
        let upper_corner = upper.len();
        upper.push((x1, y0));
        upper.extend(
            between(&self.row_points[y0 as usize], x0, x1)
                .iter()
                .rev()
                .map(|&x| (x, y0)),
        );
        upper.push((x0, y0));

        for (outline, corner) in [(lower, lower_corner), (upper, upper_corner)] {
            for [a, b, c] in corner_zip(outline.len(), corner) {
                let (pa, pb, pc) = (outline[a], outline[b], outline[c]);

                let t0 = self.vertex(pa.0, pa.1, true);
                let t1 = self.vertex(pb.0, pb.1, true);
                let t2 = self.vertex(pc.0, pc.1, true);
                self.mesh.add_triangle(t0, t1, t2);

                let b0 = self.vertex(pa.0, pa.1, false);
                let b1 = self.vertex(pb.0, pb.1, false);
                let b2 = self.vertex(pc.0, pc.1, false);
                self.mesh.add_triangle(b0, b2, b1);
            }
        }
    }

    /// One quad per segment between consecutive required points of the run.
    fn emit_wall(&mut self, run: &WallRun) {
        let horizontal = run.facing.is_horizontal();
        let line_points = if horizontal {
            &self.row_points[run.line as usize]
        } else {
            &self.column_points[run.line as usize]
        };

        let mut stops = Vec::with_capacity(line_points.len() + 2);
        stops.push(run.start);
        stops.extend_from_slice(between(line_points, run.start, run.end));
        stops.push(run.end);
        // Walk so that, seen from outside, the bottom edge runs left to right.
        if matches!(run.facing, Facing::North | Facing::East) {
            stops.reverse();
        }

        let at = |t: u32| if horizontal { (t, run.line) } else { (run.line, t) };
        for pair in stops.windows(2) {
            let (a, b) = (at(pair[0]), at(pair[1]));
            let a_bottom = self.vertex(a.0, a.1, false);
            let b_bottom = self.vertex(b.0, b.1, false);
            let b_top = self.vertex(b.0, b.1, true);
            let a_top = self.vertex(a.0, a.1, true);
            self.mesh.add_quad(a_bottom, b_bottom, b_top, a_top);
        }
    }
}

/// Sorted `points` strictly inside `(lo, hi)`.
fn between(points: &[u32], lo: u32, hi: u32) -> &[u32] {
    let start = points.partition_point(|&p| p <= lo);
    let end = points.partition_point(|&p| p < hi).max(start);
    &points[start..end]
}

/// Triangulate an open outline `0..len` whose closing edge runs from the last
/// point back to the first, with a right-angle `corner` and straight legs on
/// either side of it. Triangles keep the outline's winding.
fn corner_zip(len: usize, corner: usize) -> Vec<[usize; 3]> {
    let last = len - 1;
    let mut triangles = Vec::with_capacity(len - 2);
    triangles.push([corner - 1, corner, corner + 1]);

    let (mut i, mut j) = (corner - 1, corner + 1);
    while i > 0 || j < last {
        if i > 0 && (j == last || i >= last - j) {
            triangles.push([i - 1, i, j]);
            i -= 1;
        } else {
            triangles.push([i, j, j + 1]);
            j += 1;
        }
    }
    triangles
}

/// Find every boundary edge of the mask and merge contiguous same-facing
/// edges into runs.
fn scan_walls(
    mask: &OccupancyMask,
    checkpoint: &mut Checkpoint<'_>,
) -> Result<Vec<WallRun>, Cancelled> {
    let (width, height) = (mask.width as i64, mask.height as i64);
    let mut runs = Vec::new();

    for gy in 0..=height {
        checkpoint.tick()?;
        let mut open = None;
        for x in 0..width {
            let facing = match (mask.get_signed(x, gy - 1), mask.get_signed(x, gy)) {
                (false, true) => Some(Facing::North),
                (true, false) => Some(Facing::South),
                _ => None,
            };
            extend_run(&mut runs, &mut open, facing, gy as u32, x as u32);
        }
        runs.extend(open);
    }

    for gx in 0..=width {
        checkpoint.tick()?;
        let mut open = None;
        for y in 0..height {
            let facing = match (mask.get_signed(gx - 1, y), mask.get_signed(gx, y)) {
                (false, true) => Some(Facing::West),
                (true, false) => Some(Facing::East),
                _ => None,
            };
            extend_run(&mut runs, &mut open, facing, gx as u32, y as u32);
        }
        runs.extend(open);
    }

    Ok(runs)
}

fn extend_run(
    runs: &mut Vec<WallRun>,
    open: &mut Option<WallRun>,
    facing: Option<Facing>,
    line: u32,
    at: u32,
) {
    if let (Some(run), Some(facing)) = (open.as_mut(), facing) {
        if run.facing == facing {
            run.end = at + 1;
            return;
        }
    }
    runs.extend(open.take());
    *open = facing.map(|facing| WallRun {
        facing,
        line,
        start: at,
        end: at + 1,
    });
}
