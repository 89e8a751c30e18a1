/// Particles grouped by the mesh plane their CIC stencil starts in.
///
/// Uses counting sort for O(N) construction: count particles per plane -> prefix sum -> scatter.
/// Each bucket is then ordered by particle id, so the order in which a plane
/// receives mass does not depend on how particles were distributed over nodes.
pub struct PlaneBuckets {
    n_planes: usize,
    /// plane_start[p]..plane_start[p + 1] is bucket p in sorted_indices
    plane_start: Vec<usize>,
    /// Particle indices sorted by plane, then id
    sorted_indices: Vec<usize>,
}

impl PlaneBuckets {
    /// Build from each particle's plane (`< n_planes`) and id.
    pub fn build(n_planes: usize, planes: &[usize], ids: &[u64]) -> Self {
        debug_assert_eq!(planes.len(), ids.len());

        // 1. Count particles per plane
        let mut plane_count = vec![0usize; n_planes];
        for &p in planes {
            plane_count[p] += 1;
        }

        // 2. Prefix sum -> plane_start
        let mut plane_start = vec![0usize; n_planes + 1];
        for p in 0..n_planes {
            plane_start[p + 1] = plane_start[p] + plane_count[p];
        }

        // 3. Scatter, reusing plane_count as the fill offset
        plane_count.iter_mut().for_each(|c| *c = 0);
        let mut sorted_indices = vec![0usize; planes.len()];
        for (i, &p) in planes.iter().enumerate() {
            sorted_indices[plane_start[p] + plane_count[p]] = i;
            plane_count[p] += 1;
        }

        // 4. Order each bucket by id
        for p in 0..n_planes {
            sorted_indices[plane_start[p]..plane_start[p + 1]].sort_by_key(|&i| ids[i]);
        }

        Self {
            n_planes,
            plane_start,
            sorted_indices,
        }
    }

    pub fn n_planes(&self) -> usize {
        self.n_planes
    }

    /// Indices of the particles whose stencil starts in `plane`, in id order.
    #[inline]
    pub fn bucket(&self, plane: usize) -> &[usize] {
        &self.sorted_indices[self.plane_start[plane]..self.plane_start[plane + 1]]
    }

    pub fn len(&self) -> usize {
        self.sorted_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted_indices.is_empty()
    }
}
