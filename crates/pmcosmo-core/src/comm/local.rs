//! In-process backend: nodes are threads sharing one rendezvous.
//!
//! 1. each node posts its tag and payload into its own slot;
//! 2. after the first barrier every node cross-checks all tags and reads what
//!    it needs from the other slots;
//! 3. after the second barrier each node clears its own slot.
//!
//! All nodes inspect the same slots, so a mismatch is reported on every node.

use std::any::Any;
use std::sync::{Arc, Barrier, Mutex, MutexGuard, PoisonError};

use super::{missing_payload, Tag};
use crate::error::Result;

struct Slot {
    tag: Tag,
    payload: Box<dyn Any + Send>,
}

pub(super) struct Rendezvous {
    barrier: Barrier,
    slots: Mutex<Vec<Option<Slot>>>,
}

impl Rendezvous {
    pub(super) fn new(size: usize) -> Arc<Self> {
        Arc::new(Rendezvous {
            barrier: Barrier::new(size),
            slots: Mutex::new((0..size).map(|_| None).collect()),
        })
    }

    pub(super) fn barrier(&self, rank: usize, tag: Tag) -> Result<()> {
        self.exchange(rank, tag, (), |_| Ok(()))
    }

    pub(super) fn all_gather<T>(&self, rank: usize, tag: Tag, value: T) -> Result<Vec<T>>
    where
        T: Clone + Send + 'static,
    {
        self.exchange(rank, tag, value, |slots| {
            slots
                .iter()
                .enumerate()
                .map(|(r, slot)| {
                    slot.as_ref()
                        .and_then(|s| s.payload.downcast_ref::<T>())
                        .cloned()
                        .ok_or_else(|| missing_payload(rank, r))
                })
                .collect()
        })
    }

    pub(super) fn all_to_all<T>(&self, rank: usize, tag: Tag, send: Vec<Vec<T>>) -> Result<Vec<Vec<T>>>
    where
        T: Send + 'static,
    {
        let outgoing: Vec<Option<Vec<T>>> = send.into_iter().map(Some).collect();
        self.exchange(rank, tag, outgoing, |slots| {
            slots
                .iter_mut()
                .enumerate()
                .map(|(r, slot)| {
                    slot.as_mut()
                        .and_then(|s| s.payload.downcast_mut::<Vec<Option<Vec<T>>>>())
                        .and_then(|bufs| bufs.get_mut(rank))
                        .and_then(Option::take)
                        .ok_or_else(|| missing_payload(rank, r))
                })
                .collect()
        })
    }

    pub(super) fn gather_to_root<T>(&self, rank: usize, tag: Tag, value: T) -> Result<Option<Vec<T>>>
    where
        T: Send + 'static,
    {
        self.exchange(rank, tag, Some(value), |slots| {
            if rank != 0 {
                return Ok(None);
            }
            slots
                .iter_mut()
                .enumerate()
                .map(|(r, slot)| {
                    slot.as_mut()
                        .and_then(|s| s.payload.downcast_mut::<Option<T>>())
                        .and_then(Option::take)
                        .ok_or_else(|| missing_payload(rank, r))
                })
                .collect::<Result<Vec<T>>>()
                .map(Some)
        })
    }

    pub(super) fn broadcast<T>(&self, rank: usize, tag: Tag, root: usize, value: Option<T>) -> Result<T>
    where
        T: Clone + Send + 'static,
    {
        self.exchange(rank, tag, value, |slots| {
            slots[root]
                .as_ref()
                .and_then(|s| s.payload.downcast_ref::<Option<T>>())
                .and_then(|v| v.clone())
                .ok_or_else(|| missing_payload(rank, root))
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<Slot>>> {
        // A poisoned lock only means another node panicked; the slots are still consistent.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exchange<P, R, F>(&self, rank: usize, tag: Tag, payload: P, read: F) -> Result<R>
    where
        P: Send + 'static,
        F: FnOnce(&mut [Option<Slot>]) -> Result<R>,
    {
        self.lock()[rank] = Some(Slot {
            tag: tag.clone(),
            payload: Box::new(payload),
        });
        self.barrier.wait();

        let result = {
            let mut slots = self.lock();
            check_slots(&slots, rank, &tag).and_then(|()| read(&mut slots))
        };

        self.barrier.wait();
        self.lock()[rank] = None;
        result
    }
}

fn check_slots(slots: &[Option<Slot>], rank: usize, tag: &Tag) -> Result<()> {
    for (r, slot) in slots.iter().enumerate() {
        let Some(s) = slot else {
            return Err(missing_payload(rank, r));
        };
        tag.check(rank, r, &s.tag)?;
    }
    Ok(())
}
