//! Greedy rectangle decomposition of an occupancy mask.
//!
//! Scans cells row-major; each unvisited active cell starts a rectangle that
//! first grows right as far as it can, then grows down while the whole row
//! slice below stays active and unvisited. Wider wins over taller, so the
//! result is deterministic but not a minimal cover.

use crate::cancel::{Cancelled, Checkpoint};
use crate::segment::OccupancyMask;

/// A rectangle of mask cells: columns `x..x + width`, rows `y..y + height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CellRect {
    /// Exclusive right grid line.
    pub fn x_end(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom grid line.
    pub fn y_end(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u32 {
        self.width * self.height
    }
}

/// Cover every active cell with disjoint rectangles.
pub fn decompose(
    mask: &OccupancyMask,
    checkpoint: &mut Checkpoint<'_>,
) -> Result<Vec<CellRect>, Cancelled> {
    let (grid_width, grid_height) = (mask.width, mask.height);
    let mut visited = vec![false; grid_width as usize * grid_height as usize];
    let mut result = Vec::new();

    let idx = |x: u32, y: u32| -> usize { (y * grid_width + x) as usize };
    let open = |visited: &[bool], x: u32, y: u32| mask.get(x, y) && !visited[idx(x, y)];

    for y in 0..grid_height {
        checkpoint.tick()?;
        for x in 0..grid_width {
            if !open(&visited, x, y) {
                continue;
            }

            // Expand right
            let mut width = 1;
            while x + width < grid_width && open(&visited, x + width, y) {
                width += 1;
            }

            // Expand down
            let mut height = 1;
            while y + height < grid_height
                && (0..width).all(|dx| open(&visited, x + dx, y + height))
            {
                height += 1;
            }

            // Mark visited
            for dy in 0..height {
                for dx in 0..width {
                    visited[idx(x + dx, y + dy)] = true;
                }
            }

            result.push(CellRect {
                x,
                y,
                width,
                height,
            });
        }
    }

    Ok(result)
}
