//! Admission gate bounding how many engine processes are alive at once.
//!
//! A [`WorkerPool`] is created once per run with a capacity `J`. Every unit of work that needs
//! an engine holds a [`Slot`] from before the engine is spawned until after it has been
//! released, so at most `J` engine processes exist at any instant.
//!
//! Waiting units are woken in no particular order.

use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::trace;

#[derive(Debug, Default)]
struct Occupancy {
    in_use: usize,
    peak: usize,
}

/// A counting semaphore with a fixed capacity.
#[derive(Debug)]
pub struct WorkerPool {
    capacity: usize,
    occupancy: Mutex<Occupancy>,
    freed: Condvar,
}

impl WorkerPool {
    /// Creates a pool with `capacity` slots. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            occupancy: Mutex::new(Occupancy::default()),
            freed: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.lock().in_use
    }

    /// Highest number of slots ever held at the same time.
    pub fn peak(&self) -> usize {
        self.lock().peak
    }

    /// Blocks until a slot is free and takes it.
    pub fn acquire(&self) -> Slot<'_> {
        let mut occupancy = self.lock();
        while occupancy.in_use >= self.capacity {
            occupancy = self
                .freed
                .wait(occupancy)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        self.take(&mut occupancy)
    }

    /// Takes a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<Slot<'_>> {
        let mut occupancy = self.lock();
        if occupancy.in_use < self.capacity {
            Some(self.take(&mut occupancy))
        } else {
            None
        }
    }

    fn take(&self, occupancy: &mut Occupancy) -> Slot<'_> {
        occupancy.in_use += 1;
        occupancy.peak = occupancy.peak.max(occupancy.in_use);
        trace!(in_use = occupancy.in_use, capacity = self.capacity, "slot taken");
        Slot { pool: self }
    }

    fn give_back(&self) {
        let mut occupancy = self.lock();
        occupancy.in_use -= 1;
        trace!(in_use = occupancy.in_use, "slot freed");
        drop(occupancy);
        self.freed.notify_one();
    }

    // the counters stay consistent even if a holder panicked
    fn lock(&self) -> MutexGuard<'_, Occupancy> {
        self.occupancy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One held slot of a [`WorkerPool`], given back on drop.
#[derive(Debug)]
pub struct Slot<'a> {
    pool: &'a WorkerPool,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.pool.give_back();
    }
}
