//! MPI backend.
//!
//! Payloads travel as bincode bytes, each prefixed with its [`Tag`]. The
//! variable-length collectives first exchange byte counts, then run the
//! `v` variant (`MPI_Allgatherv`, `MPI_Alltoallv`, `MPI_Gatherv`).
//!
//! A tag mismatch is only seen by the nodes that receive the mismatching
//! bytes: every node for `all_gather` and `broadcast`, the root for
//! `gather_to_root`.

use mpi::datatype::{Partition, PartitionMut};
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::{Count, Rank};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{missing_payload, Tag};
use crate::error::{Error, Result};

pub(super) struct MpiWorld {
    world: SimpleCommunicator,
}

impl MpiWorld {
    pub(super) fn new(world: SimpleCommunicator) -> Self {
        Self { world }
    }

    pub(super) fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    pub(super) fn size(&self) -> usize {
        self.world.size() as usize
    }

    pub(super) fn barrier(&self) {
        self.world.barrier();
    }

    pub(super) fn all_gather<T>(&self, rank: usize, tag: &Tag, value: &T) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut bytes = Vec::new();
        encode_into(&mut bytes, rank, tag, value)?;
        let count = to_count(rank, bytes.len())?;

        let mut counts: Vec<Count> = vec![0; self.size()];
        self.world.all_gather_into(&count, &mut counts[..]);
        let displs = displacements(rank, &counts)?;

        let mut buf = vec![0u8; total(&counts)];
        {
            let mut partition = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
            self.world.all_gather_varcount_into(&bytes[..], &mut partition);
        }

        chunks(&buf, &counts, &displs)
            .enumerate()
            .map(|(from, chunk)| decode(rank, from, tag, chunk))
            .collect()
    }

    pub(super) fn all_to_all<T>(&self, rank: usize, tag: &Tag, send: Vec<Vec<T>>) -> Result<Vec<Vec<T>>>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut bytes = Vec::new();
        let mut send_counts: Vec<Count> = Vec::with_capacity(send.len());
        for buf in &send {
            let start = bytes.len();
            encode_into(&mut bytes, rank, tag, buf)?;
            send_counts.push(to_count(rank, bytes.len() - start)?);
        }
        drop(send);

        let mut recv_counts: Vec<Count> = vec![0; self.size()];
        self.world.all_to_all_into(&send_counts[..], &mut recv_counts[..]);
        let send_displs = displacements(rank, &send_counts)?;
        let recv_displs = displacements(rank, &recv_counts)?;

        let mut buf = vec![0u8; total(&recv_counts)];
        {
            let outgoing = Partition::new(&bytes[..], &send_counts[..], &send_displs[..]);
            let mut incoming = PartitionMut::new(&mut buf[..], &recv_counts[..], &recv_displs[..]);
            self.world.all_to_all_varcount_into(&outgoing, &mut incoming);
        }

        chunks(&buf, &recv_counts, &recv_displs)
            .enumerate()
            .map(|(from, chunk)| decode(rank, from, tag, chunk))
            .collect()
    }

    pub(super) fn gather_to_root<T>(&self, rank: usize, tag: &Tag, value: &T) -> Result<Option<Vec<T>>>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut bytes = Vec::new();
        encode_into(&mut bytes, rank, tag, value)?;
        let count = to_count(rank, bytes.len())?;
        let root = self.world.process_at_rank(0);

        if rank != 0 {
            root.gather_into(&count);
            root.gather_varcount_into(&bytes[..]);
            return Ok(None);
        }

        let mut counts: Vec<Count> = vec![0; self.size()];
        root.gather_into_root(&count, &mut counts[..]);
        let displs = displacements(rank, &counts)?;

        let mut buf = vec![0u8; total(&counts)];
        {
            let mut partition = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
            root.gather_varcount_into_root(&bytes[..], &mut partition);
        }

        chunks(&buf, &counts, &displs)
            .enumerate()
            .map(|(from, chunk)| decode(rank, from, tag, chunk))
            .collect::<Result<Vec<T>>>()
            .map(Some)
    }

    pub(super) fn broadcast<T>(&self, rank: usize, tag: &Tag, root: usize, value: &Option<T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let process = self.world.process_at_rank(root as Rank);
        let mut bytes = Vec::new();
        if rank == root {
            encode_into(&mut bytes, rank, tag, value)?;
        }

        let mut len = bytes.len() as u64;
        process.broadcast_into(&mut len);
        bytes.resize(len as usize, 0);
        process.broadcast_into(&mut bytes[..]);

        decode::<Option<T>>(rank, root, tag, &bytes)?.ok_or_else(|| missing_payload(rank, root))
    }
}

// ---------- helper functions ----------

fn encode_into<T>(out: &mut Vec<u8>, rank: usize, tag: &Tag, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    bincode::serialize_into(&mut *out, tag)
        .and_then(|()| bincode::serialize_into(&mut *out, value))
        .map_err(|e| {
            Error::InvalidArgument(format!("node {} cannot encode {} payload: {}", rank, tag.op, e))
        })
}

fn decode<T>(rank: usize, from: usize, tag: &Tag, mut chunk: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
{
    let undecodable = |e: bincode::Error| Error::CollectiveMismatch {
        rank,
        message: format!("undecodable payload from node {}: {}", from, e),
    };
    let theirs: Tag = bincode::deserialize_from(&mut chunk).map_err(undecodable)?;
    tag.check(rank, from, &theirs)?;
    bincode::deserialize_from(&mut chunk).map_err(undecodable)
}

fn to_count(rank: usize, len: usize) -> Result<Count> {
    Count::try_from(len).map_err(|_| {
        Error::InvalidArgument(format!("node {}: message of {} bytes is too large for MPI", rank, len))
    })
}

/// Exclusive prefix sum of `counts`.
fn displacements(rank: usize, counts: &[Count]) -> Result<Vec<Count>> {
    let mut displs = Vec::with_capacity(counts.len());
    let mut acc: usize = 0;
    for &c in counts {
        displs.push(to_count(rank, acc)?);
        acc += c as usize;
    }
    Ok(displs)
}

fn total(counts: &[Count]) -> usize {
    counts.iter().map(|&c| c as usize).sum()
}

fn chunks<'a>(buf: &'a [u8], counts: &'a [Count], displs: &'a [Count]) -> impl Iterator<Item = &'a [u8]> + 'a {
    counts
        .iter()
        .zip(displs)
        .map(move |(&c, &d)| &buf[d as usize..(d + c) as usize])
}
