use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::DVec3;

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::math::{try_with_capacity, wrap_periodic, wrap_position};

/// One particle of the ensemble.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    /// Globally unique, fixed once assigned.
    pub id: u64,
    pub position: DVec3,
    pub velocity: DVec3,
    /// First-order (Zel'dovich) displacement ψ1.
    pub displacement1: DVec3,
    /// Second-order displacement ψ2.
    pub displacement2: DVec3,
}

impl Particle {
    pub fn at(id: u64, position: DVec3) -> Self {
        Self {
            id,
            position,
            velocity: DVec3::ZERO,
            displacement1: DVec3::ZERO,
            displacement2: DVec3::ZERO,
        }
    }
}

/// Halo membership written by an external grouping pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Group {
    #[default]
    Ungrouped,
    Member(u32),
}

/// Source of fresh particle ids.
///
/// Node `rank` of `n` hands out `rank, rank + n, rank + 2n, ...` on top of a
/// common base, so ids never collide between nodes. Clones share the counter:
/// an ensemble and the subsets taken from it never hand out the same id.
#[derive(Clone, Debug)]
pub struct IdSequence {
    next: Arc<AtomicU64>,
    stride: u64,
}

impl IdSequence {
    pub fn new(start: u64, stride: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(start)),
            stride: stride.max(1),
        }
    }

    /// Sequence for node `rank` of `n_nodes`, starting after `base` ids.
    pub fn for_node(base: u64, rank: usize, n_nodes: usize) -> Self {
        Self::new(base + rank as u64, n_nodes as u64)
    }

    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// `true` if both handles draw from the same counter.
    pub fn is_shared_with(&self, other: &IdSequence) -> bool {
        Arc::ptr_eq(&self.next, &other.next)
    }

    fn take(&self) -> u64 {
        self.next.fetch_add(self.stride, Ordering::Relaxed)
    }
}

/// Node-local particle store with explicit capacity.
///
/// Length never exceeds the capacity fixed at allocation; growth beyond it
/// fails with [`Error::CapacityExceeded`] and leaves the ensemble untouched.
/// Forces are only defined after a force computation and are invalidated by
/// any change of the particle set. Accessors return copies.
pub struct ParticleEnsemble {
    pub(crate) particles: Vec<Particle>,
    pub(crate) force: Vec<DVec3>,
    pub(crate) groups: Vec<Group>,
    force_valid: bool,
    capacity: usize,
    box_size: f64,
    total_count: u64,
    ids: IdSequence,
}

impl ParticleEnsemble {
    /// Empty single-node ensemble; ids start at zero.
    pub fn allocate(capacity: usize, box_size: f64) -> Result<Self> {
        Self::allocate_for_node(capacity, box_size, 0, 1)
    }

    /// Empty ensemble for node `rank` of `n_nodes`, with node-strided ids.
    pub fn allocate_for_node(
        capacity: usize,
        box_size: f64,
        rank: usize,
        n_nodes: usize,
    ) -> Result<Self> {
        if !(box_size.is_finite() && box_size > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "box size must be positive, got {}",
                box_size
            )));
        }
        if n_nodes == 0 || rank >= n_nodes {
            return Err(Error::InvalidArgument(format!(
                "rank {} is not part of a {}-node run",
                rank, n_nodes
            )));
        }

        Ok(Self {
            particles: try_with_capacity(capacity, "particles")?,
            force: try_with_capacity(capacity, "particle forces")?,
            groups: try_with_capacity(capacity, "particle groups")?,
            force_valid: false,
            capacity,
            box_size,
            total_count: 0,
            ids: IdSequence::for_node(0, rank, n_nodes),
        })
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn box_size(&self) -> f64 {
        self.box_size
    }

    /// Global count cached by the last [`update_total_count`](Self::update_total_count).
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn id_sequence(&self) -> &IdSequence {
        &self.ids
    }

    pub fn has_forces(&self) -> bool {
        self.force_valid
    }

    /// Set the local length. New particles sit at the origin with fresh ids.
    pub fn resize(&mut self, n: usize) -> Result<()> {
        self.check_capacity(n)?;
        let len = self.len();
        if n < len {
            self.particles.truncate(n);
            self.force.truncate(n);
            self.groups.truncate(n);
            return Ok(());
        }

        for _ in len..n {
            let id = self.ids.take();
            self.particles.push(Particle::at(id, DVec3::ZERO));
            self.force.push(DVec3::ZERO);
            self.groups.push(Group::Ungrouped);
        }
        if n > len {
            self.force_valid = false;
        }
        Ok(())
    }

    /// Append one particle per position with fresh ids; velocities and displacements are zero.
    pub fn append(&mut self, positions: &[DVec3]) -> Result<()> {
        if positions.is_empty() {
            return Ok(());
        }
        self.check_capacity(self.len() + positions.len())?;

        for &p in positions {
            let id = self.ids.take();
            self.particles.push(Particle::at(id, p));
            self.force.push(DVec3::ZERO);
            self.groups.push(Group::Ungrouped);
        }
        self.force_valid = false;
        log::debug!(
            "[particles] appended {} particles, length {}",
            positions.len(),
            self.len()
        );
        Ok(())
    }

    /// Drop every particle; capacity and the id sequence are kept.
    pub fn clear(&mut self) {
        self.particles.clear();
        self.force.clear();
        self.groups.clear();
        self.force_valid = false;
    }

    /// Evenly strided subset of `ceil(fraction * len)` particles, ids preserved.
    /// The subset draws fresh ids from this ensemble's sequence.
    ///
    /// Particle `i * len / n_keep` is kept for `i in 0..n_keep`, so the subset
    /// depends only on the local length.
    pub fn slice(&self, fraction: f64) -> Result<Self> {
        check_fraction(fraction)?;
        let len = self.len();
        let n_keep = ((fraction * len as f64).ceil() as usize).min(len);
        let indices = (0..n_keep).map(|i| (i as u128 * len as u128 / n_keep as u128) as usize);
        self.subset(indices, n_keep)
    }

    /// Particles whose wrapped z coordinate lies below `fraction * box_size`.
    pub fn select_slab(&self, fraction: f64) -> Result<Self> {
        check_fraction(fraction)?;
        let z_max = fraction * self.box_size;
        let indices: Vec<usize> = self
            .particles
            .iter()
            .enumerate()
            .filter(|(_, p)| wrap_periodic(p.position.z, self.box_size) < z_max)
            .map(|(i, _)| i)
            .collect();
        let n = indices.len();
        self.subset(indices.into_iter(), n)
    }

    /// Collective: sum the local lengths of all nodes into the cached total.
    pub fn update_total_count(&mut self, comm: &Communicator) -> Result<u64> {
        self.total_count = comm.all_reduce_sum_u64(self.len() as u64)?;
        log::debug!(
            "[particles] node {} holds {} of {}",
            comm.rank(),
            self.len(),
            self.total_count
        );
        Ok(self.total_count)
    }

    /// Map every position into `[0, box_size)` on each axis.
    pub fn periodic_wrapup(&mut self) {
        let l = self.box_size;
        for p in self.particles.iter_mut() {
            p.position = wrap_position(p.position, l);
        }
    }

    // ---------- copy-out accessors ----------

    pub fn particle(&self, index: usize) -> Option<Particle> {
        self.particles.get(index).copied()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.particles.iter().map(|p| p.id).collect()
    }

    pub fn positions(&self) -> Vec<DVec3> {
        self.particles.iter().map(|p| p.position).collect()
    }

    pub fn velocities(&self) -> Vec<DVec3> {
        self.particles.iter().map(|p| p.velocity).collect()
    }

    pub fn displacements1(&self) -> Vec<DVec3> {
        self.particles.iter().map(|p| p.displacement1).collect()
    }

    pub fn displacements2(&self) -> Vec<DVec3> {
        self.particles.iter().map(|p| p.displacement2).collect()
    }

    /// Per-particle forces, `None` until a force computation has run.
    pub fn forces(&self) -> Option<Vec<DVec3>> {
        self.force_valid.then(|| self.force.clone())
    }

    pub fn groups(&self) -> Vec<Group> {
        self.groups.clone()
    }

    pub fn group_of(&self, index: usize) -> Option<Group> {
        self.groups.get(index).copied()
    }

    /// Replace the group association of every local particle.
    pub fn set_groups(&mut self, groups: Vec<Group>) -> Result<()> {
        if groups.len() != self.len() {
            return Err(Error::InvalidArgument(format!(
                "{} group entries for {} particles",
                groups.len(),
                self.len()
            )));
        }
        self.groups = groups;
        Ok(())
    }

    // ---------- crate-internal mutation ----------

    pub(crate) fn as_slice(&self) -> &[Particle] {
        &self.particles
    }

    pub(crate) fn set_forces(&mut self, force: Vec<DVec3>) -> Result<()> {
        if force.len() != self.len() {
            return Err(Error::InvalidArgument(format!(
                "{} forces for {} particles",
                force.len(),
                self.len()
            )));
        }
        self.force = force;
        self.force_valid = true;
        Ok(())
    }

    /// Swap in a freshly generated particle set; groups reset and forces invalidated.
    pub(crate) fn replace_particles(&mut self, particles: Vec<Particle>, ids: IdSequence) -> Result<()> {
        let n = particles.len();
        self.check_capacity(n)?;
        self.particles.clear();
        self.particles.extend(particles);
        self.force.clear();
        self.force.resize(n, DVec3::ZERO);
        self.groups.clear();
        self.groups.resize(n, Group::Ungrouped);
        self.force_valid = false;
        self.ids = ids;
        Ok(())
    }

    // ---------- helper functions ----------

    fn check_capacity(&self, requested: usize) -> Result<()> {
        if requested > self.capacity {
            return Err(Error::CapacityExceeded {
                requested,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn subset<I: Iterator<Item = usize>>(&self, indices: I, n: usize) -> Result<Self> {
        let mut particles = try_with_capacity(n, "particles")?;
        let mut force = try_with_capacity(n, "particle forces")?;
        let mut groups = try_with_capacity(n, "particle groups")?;
        for i in indices {
            particles.push(self.particles[i]);
            force.push(self.force[i]);
            groups.push(self.groups[i]);
        }
        Ok(Self {
            particles,
            force,
            groups,
            force_valid: self.force_valid,
            capacity: n,
            box_size: self.box_size,
            total_count: 0,
            ids: self.ids.clone(),
        })
    }
}

fn check_fraction(fraction: f64) -> Result<()> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(Error::InvalidArgument(format!(
            "fraction must be in (0, 1], got {}",
            fraction
        )));
    }
    Ok(())
}
