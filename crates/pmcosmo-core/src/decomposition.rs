use glam::DVec3;

use crate::error::{Error, Result};
use crate::math::in_box;

/// A contiguous range of mesh planes along x.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slab {
    pub start: usize,
    pub len: usize,
}

impl Slab {
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn contains(&self, plane: usize) -> bool {
        plane >= self.start && plane < self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Slab decomposition of the periodic cube along x, one slab per node.
///
/// `grid_size` planes are split as evenly as possible: the first
/// `grid_size % n_nodes` nodes get one extra plane. The same split is used
/// for the transposed (y) layout in Fourier space.
#[derive(Clone, Debug)]
pub struct Decomposition {
    grid_size: usize,
    box_size: f64,
    slabs: Vec<Slab>,
}

impl Decomposition {
    pub fn new(grid_size: usize, box_size: f64, n_nodes: usize) -> Result<Self> {
        if grid_size == 0 {
            return Err(Error::InvalidArgument("grid size must be positive".into()));
        }
        if !(box_size.is_finite() && box_size > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "box size must be positive, got {}",
                box_size
            )));
        }
        if n_nodes == 0 {
            return Err(Error::InvalidArgument("at least one node is required".into()));
        }

        let base = grid_size / n_nodes;
        let rem = grid_size % n_nodes;
        let slabs = (0..n_nodes)
            .map(|r| Slab {
                start: r * base + r.min(rem),
                len: base + usize::from(r < rem),
            })
            .collect();

        Ok(Self {
            grid_size,
            box_size,
            slabs,
        })
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn box_size(&self) -> f64 {
        self.box_size
    }

    pub fn n_nodes(&self) -> usize {
        self.slabs.len()
    }

    pub fn slab(&self, rank: usize) -> Slab {
        self.slabs[rank]
    }

    pub fn slabs(&self) -> &[Slab] {
        &self.slabs
    }

    /// Node owning mesh plane `plane` (`plane < grid_size`).
    pub fn owner_of_plane(&self, plane: usize) -> usize {
        let n = self.slabs.len();
        let base = self.grid_size / n;
        let rem = self.grid_size % n;
        let wide = rem * (base + 1);
        if plane < wide {
            plane / (base + 1)
        } else {
            rem + (plane - wide) / base
        }
    }

    /// Mesh plane containing coordinate `x`, or `None` outside `[0, box_size)`.
    pub fn plane_of(&self, x: f64) -> Option<usize> {
        if !(x.is_finite() && x >= 0.0 && x < self.box_size) {
            return None;
        }
        let plane = (x * self.grid_size as f64 / self.box_size) as usize;
        // x just below box_size can round up to grid_size
        Some(plane.min(self.grid_size - 1))
    }

    /// Node whose slab contains `position`, or `None` if it is outside the box.
    pub fn owner_of(&self, position: DVec3) -> Option<usize> {
        if !in_box(position, self.box_size) {
            return None;
        }
        self.plane_of(position.x).map(|p| self.owner_of_plane(p))
    }

    /// Physical x-range `[lo, hi)` covered by `rank`.
    pub fn x_range(&self, rank: usize) -> (f64, f64) {
        let s = self.slabs[rank];
        let dx = self.box_size / self.grid_size as f64;
        (s.start as f64 * dx, s.end() as f64 * dx)
    }
}
