//! Cooperating nodes and their collective operations.
//!
//! A [`Communicator`] is one node's handle on a fixed set of nodes. Two
//! backends carry the collectives:
//!
//! - in-process: a [`Cluster`] runs one closure per node on its own thread and
//!   the nodes meet in a shared rendezvous;
//! - MPI (feature `mpi`): [`Communicator::from_mpi`] wraps an MPI communicator
//!   and each collective maps onto its MPI counterpart, with payloads encoded
//!   by bincode.
//!
//! Every collective carries a [`Tag`]: the node's collective sequence number,
//! the operation name and the payload type. A divergence in call order is
//! detected from the tags and surfaces as [`Error::CollectiveMismatch`]. A
//! node that skips a collective altogether cannot be detected this way: the
//! others block forever. Node code must therefore not return early between
//! collectives, and must not panic.

mod local;
#[cfg(feature = "mpi")]
mod mpi_world;

use std::any::type_name;
use std::cell::Cell;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use self::local::Rendezvous;

/// Values that can travel through a collective on either backend.
pub trait Payload: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + 'static {}

/// Identity of one collective call, compared across nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Tag {
    seq: u64,
    op: String,
    payload_type: String,
}

impl Tag {
    /// `Ok` if node `from` is in the same collective as this node (`rank`).
    fn check(&self, rank: usize, from: usize, theirs: &Tag) -> Result<()> {
        if self == theirs {
            return Ok(());
        }
        Err(Error::CollectiveMismatch {
            rank,
            message: format!(
                "call #{} is {}<{}> here but node {} is at call #{} {}<{}>",
                self.seq, self.op, self.payload_type, from, theirs.seq, theirs.op, theirs.payload_type
            ),
        })
    }
}

enum Backend {
    Local(Arc<Rendezvous>),
    #[cfg(feature = "mpi")]
    Mpi(mpi_world::MpiWorld),
}

/// Handle of one node.
pub struct Communicator {
    rank: usize,
    size: usize,
    seq: Cell<u64>,
    backend: Backend,
}

/// A fixed set of in-process nodes, established once per run.
pub struct Cluster;

impl Cluster {
    /// Run `node` once per rank on `n_nodes` threads and collect the results in rank order.
    ///
    /// Panics in a node closure are propagated after all threads have been joined.
    pub fn run<T, F>(n_nodes: usize, node: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(Communicator) -> T + Sync,
    {
        if n_nodes == 0 {
            return Err(Error::InvalidArgument(
                "a cluster needs at least one node".into(),
            ));
        }
        let shared = Rendezvous::new(n_nodes);
        log::debug!("[comm] starting {} nodes", n_nodes);

        let results = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..n_nodes)
                .map(|rank| {
                    let node = &node;
                    let shared = Arc::clone(&shared);
                    scope.spawn(move || node(Communicator::local(rank, n_nodes, shared)))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        });
        Ok(results)
    }
}

impl Communicator {
    /// A single-node communicator; every collective is a local no-op.
    pub fn solo() -> Self {
        Self::local(0, 1, Rendezvous::new(1))
    }

    fn local(rank: usize, size: usize, shared: Arc<Rendezvous>) -> Self {
        Communicator {
            rank,
            size,
            seq: Cell::new(0),
            backend: Backend::Local(shared),
        }
    }

    /// Node handle on an MPI communicator, usually `universe.world()`.
    ///
    /// The caller keeps the `mpi::environment::Universe` alive for as long as
    /// the handle is used.
    #[cfg(feature = "mpi")]
    pub fn from_mpi(world: ::mpi::topology::SimpleCommunicator) -> Self {
        let world = mpi_world::MpiWorld::new(world);
        log::debug!("[comm] MPI node {} of {}", world.rank(), world.size());
        Communicator {
            rank: world.rank(),
            size: world.size(),
            seq: Cell::new(0),
            backend: Backend::Mpi(world),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    /// Number of collectives this node has entered so far.
    pub fn collective_count(&self) -> u64 {
        self.seq.get()
    }

    pub fn barrier(&self) -> Result<()> {
        let tag = self.next_tag::<()>("barrier");
        let result = match &self.backend {
            Backend::Local(shared) => shared.barrier(self.rank, tag),
            #[cfg(feature = "mpi")]
            Backend::Mpi(world) => {
                world.barrier();
                Ok(())
            }
        };
        self.report(result)
    }

    /// Every node receives every node's value, in rank order.
    pub fn all_gather<T>(&self, value: T) -> Result<Vec<T>>
    where
        T: Payload + Clone,
    {
        let tag = self.next_tag::<T>("all_gather");
        let result = match &self.backend {
            Backend::Local(shared) => shared.all_gather(self.rank, tag, value),
            #[cfg(feature = "mpi")]
            Backend::Mpi(world) => world.all_gather(self.rank, &tag, &value),
        };
        self.report(result)
    }

    /// Sum over all nodes, accumulated in rank order so every node gets the same bits.
    pub fn all_reduce_sum_f64(&self, value: f64) -> Result<f64> {
        Ok(self.all_gather(value)?.into_iter().sum())
    }

    pub fn all_reduce_sum_u64(&self, value: u64) -> Result<u64> {
        Ok(self.all_gather(value)?.into_iter().sum())
    }

    pub fn all_reduce_max_f64(&self, value: f64) -> Result<f64> {
        Ok(self
            .all_gather(value)?
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max))
    }

    pub fn all_reduce_max_u64(&self, value: u64) -> Result<u64> {
        Ok(self.all_gather(value)?.into_iter().max().unwrap_or(0))
    }

    /// `send[d]` goes to node `d`; the result holds what every node sent here, by source rank.
    pub fn all_to_all<T>(&self, send: Vec<Vec<T>>) -> Result<Vec<Vec<T>>>
    where
        T: Payload,
    {
        if send.len() != self.size {
            return Err(Error::InvalidArgument(format!(
                "all_to_all needs {} outgoing buffers, got {}",
                self.size,
                send.len()
            )));
        }
        let tag = self.next_tag::<T>("all_to_all");
        let result = match &self.backend {
            Backend::Local(shared) => shared.all_to_all(self.rank, tag, send),
            #[cfg(feature = "mpi")]
            Backend::Mpi(world) => world.all_to_all(self.rank, &tag, send),
        };
        self.report(result)
    }

    /// Rank 0 receives every node's value in rank order; the other ranks get `None`.
    pub fn gather_to_root<T>(&self, value: T) -> Result<Option<Vec<T>>>
    where
        T: Payload,
    {
        let tag = self.next_tag::<T>("gather_to_root");
        let result = match &self.backend {
            Backend::Local(shared) => shared.gather_to_root(self.rank, tag, value),
            #[cfg(feature = "mpi")]
            Backend::Mpi(world) => world.gather_to_root(self.rank, &tag, &value),
        };
        self.report(result)
    }

    /// Every node receives the value posted by `root`.
    pub fn broadcast<T>(&self, root: usize, value: Option<T>) -> Result<T>
    where
        T: Payload + Clone,
    {
        if root >= self.size {
            return Err(Error::InvalidArgument(format!(
                "broadcast root {} out of range for {} nodes",
                root, self.size
            )));
        }
        let tag = self.next_tag::<T>("broadcast");
        let result = match &self.backend {
            Backend::Local(shared) => shared.broadcast(self.rank, tag, root, value),
            #[cfg(feature = "mpi")]
            Backend::Mpi(world) => world.broadcast(self.rank, &tag, root, &value),
        };
        self.report(result)
    }

    // ---------- helper functions ----------

    fn next_tag<T>(&self, op: &str) -> Tag {
        let seq = self.seq.get() + 1;
        self.seq.set(seq);
        Tag {
            seq,
            op: op.to_owned(),
            payload_type: type_name::<T>().to_owned(),
        }
    }

    fn report<R>(&self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            log::error!("[comm] node {}: {}", self.rank, e);
        }
        result
    }
}

fn missing_payload(rank: usize, from: usize) -> Error {
    Error::CollectiveMismatch {
        rank,
        message: format!("no payload from node {}", from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solo_collectives_are_identity() {
        let comm = Communicator::solo();
        assert_eq!(comm.size(), 1);
        assert_eq!(comm.all_reduce_sum_u64(7).unwrap(), 7);
        assert_eq!(comm.all_to_all(vec![vec![1, 2, 3]]).unwrap(), vec![vec![1, 2, 3]]);
        assert_eq!(comm.collective_count(), 2);
    }

    #[test]
    fn test_tag_mismatch_names_both_calls() {
        let comm = Communicator::solo();
        let here = comm.next_tag::<u64>("all_gather");
        let there = comm.next_tag::<f64>("all_gather");
        match here.check(0, 1, &there) {
            Err(Error::CollectiveMismatch { rank: 0, message }) => {
                assert!(message.contains("u64") && message.contains("f64"), "{}", message);
                assert!(message.contains("node 1"), "{}", message);
            }
            other => panic!("expected a mismatch, got {:?}", other),
        }
        assert!(here.check(0, 0, &here.clone()).is_ok());
    }
}
