//! Ghost exchange between slab owners.
//!
//! Particles are not migrated. Instead each node sends a copy of every
//! particle to the owners of the two x planes its CIC stencil touches. The
//! owners deposit and interpolate on their own planes and send the per-plane
//! force contributions back in the order they were received.

use glam::DVec3;

use crate::comm::Communicator;
use crate::decomposition::Decomposition;
use crate::error::{Error, Result};
use crate::particle::Particle;
use crate::pm::cic::CicStencil;

/// Where a local particle's two plane contributions are computed.
#[derive(Clone, Copy, Debug)]
struct Route {
    /// (destination rank, position in the buffer sent there) for the lower x plane
    lower: (usize, usize),
    upper: (usize, usize),
}

/// Bookkeeping of one scatter, needed to route forces back.
pub(crate) struct GhostExchange {
    routes: Vec<Route>,
    /// Number of mesh particles received from each source rank
    received: Vec<usize>,
}

/// A particle copy as seen by the node owning one of its planes.
pub(crate) struct MeshParticle {
    pub id: u64,
    pub stencil: CicStencil,
}

impl GhostExchange {
    /// Collective: send each particle to the owners of its stencil planes.
    ///
    /// Returns the received copies concatenated in source-rank order.
    pub fn scatter(
        comm: &Communicator,
        decomposition: &Decomposition,
        particles: &[Particle],
    ) -> Result<(Self, Vec<MeshParticle>)> {
        let n = decomposition.grid_size();
        let l = decomposition.box_size();
        let mut send: Vec<Vec<(u64, DVec3)>> = vec![Vec::new(); comm.size()];
        let mut routes = Vec::with_capacity(particles.len());

        for p in particles {
            let s = CicStencil::new(p.position, n, l);
            let lo = decomposition.owner_of_plane(s.i0[0]);
            let hi = decomposition.owner_of_plane(s.i1[0]);

            let lower = (lo, send[lo].len());
            send[lo].push((p.id, p.position));
            let upper = if hi == lo {
                lower
            } else {
                send[hi].push((p.id, p.position));
                (hi, send[hi].len() - 1)
            };
            routes.push(Route { lower, upper });
        }

        let outgoing: Vec<usize> = send.iter().map(Vec::len).collect();
        let incoming = comm.all_to_all(send)?;
        let received: Vec<usize> = incoming.iter().map(Vec::len).collect();
        log::debug!(
            "[pm] node {} sent {:?} particle copies, received {:?}",
            comm.rank(),
            outgoing,
            received
        );

        let mesh_particles = incoming
            .into_iter()
            .flatten()
            .map(|(id, position)| MeshParticle {
                id,
                stencil: CicStencil::new(position, n, l),
            })
            .collect();

        Ok((Self { routes, received }, mesh_particles))
    }

    /// Collective: return `partials` (aligned with the scattered mesh
    /// particles) to their senders and sum them into one force per local particle.
    pub fn gather(&self, comm: &Communicator, partials: Vec<[DVec3; 2]>) -> Result<Vec<DVec3>> {
        let expected: usize = self.received.iter().sum();
        if partials.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "{} partial forces for {} mesh particles",
                partials.len(),
                expected
            )));
        }

        let mut replies = Vec::with_capacity(self.received.len());
        let mut rest = partials.into_iter();
        for &count in &self.received {
            replies.push(rest.by_ref().take(count).collect::<Vec<_>>());
        }

        let returned = comm.all_to_all(replies)?;

        self.routes
            .iter()
            .map(|r| {
                let lower = lookup(&returned, r.lower, comm.rank())?[0];
                let upper = lookup(&returned, r.upper, comm.rank())?[1];
                Ok(lower + upper)
            })
            .collect()
    }
}

fn lookup(returned: &[Vec<[DVec3; 2]>], (rank, slot): (usize, usize), me: usize) -> Result<[DVec3; 2]> {
    returned
        .get(rank)
        .and_then(|buf| buf.get(slot))
        .copied()
        .ok_or_else(|| Error::CollectiveMismatch {
            rank: me,
            message: format!("node {} returned no force for slot {}", rank, slot),
        })
}
