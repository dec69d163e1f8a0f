//! Invoke id allocation.
//!
//! Ids are global to the local device: at most one outstanding confirmed
//! request per id, whatever its destination.

use std::time::Duration;
use tokio::time::Instant;

pub const INVOKE_ID_COUNT: usize = 256;

enum Slot<T> {
    Free { reusable_at: Option<Instant> },
    Busy(T),
}

/// Maps invoke ids to the state of their outstanding request.
pub struct InvokeRegistry<T> {
    slots: Vec<Slot<T>>,
    grace: Duration,
    outstanding: usize,
}

impl<T> InvokeRegistry<T> {
    /// `grace` keeps a released id unused for that long.
    pub fn new(grace: Duration) -> Self {
        Self {
            slots: (0..INVOKE_ID_COUNT)
                .map(|_| Slot::Free { reusable_at: None })
                .collect(),
            grace,
            outstanding: 0,
        }
    }

    fn free_index(&self, now: Instant) -> Option<usize> {
        self.slots.iter().position(|slot| match slot {
            Slot::Free { reusable_at } => reusable_at.map_or(true, |at| now >= at),
            Slot::Busy(_) => false,
        })
    }

    /// Whether [`allocate`](Self::allocate) would succeed at `now`.
    pub fn available(&self, now: Instant) -> bool {
        self.free_index(now).is_some()
    }

    /// Claims the smallest usable id and stores `make(id)` under it.
    ///
    /// Returns `None` when every id is outstanding or still in its grace period.
    pub fn allocate(&mut self, now: Instant, make: impl FnOnce(u8) -> T) -> Option<u8> {
        let index = self.free_index(now)?;
        let id = index as u8;
        self.slots[index] = Slot::Busy(make(id));
        self.outstanding += 1;
        Some(id)
    }

    pub fn lookup(&self, id: u8) -> Option<&T> {
        match &self.slots[usize::from(id)] {
            Slot::Busy(entry) => Some(entry),
            Slot::Free { .. } => None,
        }
    }

    pub fn lookup_mut(&mut self, id: u8) -> Option<&mut T> {
        match &mut self.slots[usize::from(id)] {
            Slot::Busy(entry) => Some(entry),
            Slot::Free { .. } => None,
        }
    }

    /// Frees `id`, handing back its entry. Releasing a free id is a no-op.
    pub fn release(&mut self, id: u8, now: Instant) -> Option<T> {
        self.release_held(id, now, Duration::ZERO)
    }

    /// Like [`release`](Self::release), but keeps `id` unused for at least
    /// `hold`, or the grace period if that is longer.
    pub fn release_held(&mut self, id: u8, now: Instant, hold: Duration) -> Option<T> {
        let slot = &mut self.slots[usize::from(id)];
        if matches!(slot, Slot::Free { .. }) {
            return None;
        }
        let hold = hold.max(self.grace);
        let reusable_at = (!hold.is_zero()).then(|| now + hold);
        match std::mem::replace(slot, Slot::Free { reusable_at }) {
            Slot::Busy(entry) => {
                self.outstanding -= 1;
                Some(entry)
            }
            Slot::Free { .. } => None,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Releases every outstanding id.
    pub fn drain(&mut self) -> Vec<T> {
        let mut entries = Vec::with_capacity(self.outstanding);
        for slot in &mut self.slots {
            if let Slot::Busy(entry) = std::mem::replace(slot, Slot::Free { reusable_at: None }) {
                entries.push(entry);
            }
        }
        self.outstanding = 0;
        entries
    }
}
