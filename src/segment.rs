//! Per-layer occupancy masks derived from the height field.

use crate::cancel::{Cancelled, Checkpoint};
use crate::height::{HeightField, LayerStack};

/// Tolerance when comparing a pixel height against a layer top.
pub const HEIGHT_EPSILON: f32 = 1e-3;

/// Layers thinner than this are skipped.
pub const MIN_LAYER_THICKNESS: f32 = 1e-6;

/// Row-major "does this layer include this pixel" grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyMask {
    pub width: u32,
    pub height: u32,
    cells: Vec<bool>,
}

impl OccupancyMask {
    pub fn new(width: u32, height: u32, cells: Vec<bool>) -> Self {
        assert_eq!(cells.len(), width as usize * height as usize);
        Self {
            width,
            height,
            cells,
        }
    }

    /// Parse rows of `#` (active) and `.` (inactive).
    pub fn from_rows(rows: &[&str]) -> Self {
        let height = rows.len() as u32;
        let width = rows.first().map_or(0, |r| r.len()) as u32;
        let cells = rows
            .iter()
            .flat_map(|row| row.bytes().map(|b| b == b'#'))
            .collect();
        Self::new(width, height, cells)
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.cells[(y * self.width + x) as usize]
    }

    /// Like [`get`](Self::get) but `false` outside the grid.
    #[inline]
    pub fn get_signed(&self, x: i64, y: i64) -> bool {
        x >= 0
            && y >= 0
            && (x as u64) < self.width as u64
            && (y as u64) < self.height as u64
            && self.get(x as u32, y as u32)
    }

    pub fn active_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.cells.iter().any(|&c| c)
    }

    /// True when every active cell of `self` is active in `other`.
    pub fn is_subset_of(&self, other: &OccupancyMask) -> bool {
        self.cells.len() == other.cells.len()
            && self.cells.iter().zip(&other.cells).all(|(&a, &b)| !a || b)
    }
}

/// Pixels whose column reaches `top`.
pub fn layer_mask(
    field: &HeightField,
    top: f32,
    checkpoint: &mut Checkpoint<'_>,
) -> Result<OccupancyMask, Cancelled> {
    let mut cells = Vec::with_capacity(field.values.len());
    for row in field.values.chunks(field.width.max(1) as usize) {
        checkpoint.tick()?;
        cells.extend(row.iter().map(|&h| h > 0.0 && h >= top - HEIGHT_EPSILON));
    }
    Ok(OccupancyMask::new(field.width, field.height, cells))
}

/// Stack positions that produce geometry, bottom first.
pub fn meshable_layers(stack: &LayerStack) -> impl Iterator<Item = usize> + '_ {
    (0..stack.len()).filter(move |&position| stack.thickness(position) > MIN_LAYER_THICKNESS)
}
