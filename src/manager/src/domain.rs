use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use skizze_sketches::Sketch;
use tokio::sync::Mutex;

/// DomainState is the cache residency of a domain as seen from outside.
///
/// Loading is not observable: a domain is loaded while its lock is held, so
/// callers either wait for the load or see its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    Absent,
    Resident { dirty: bool },
}

pub(crate) struct Resident {
    pub(crate) sketch: Box<dyn Sketch>,
    /// the sketch holds mutations the state store has not seen yet
    pub(crate) dirty: bool,
    /// footprint of the sketch as last accounted in the manager totals
    pub(crate) bytes: usize,
}

pub(crate) enum SlotState {
    /// not in memory, the durable state is authoritative.
    Absent,
    Resident(Resident),
    /// the slot left the cache: the domain was evicted, deleted, or never
    /// existed. Whoever finds a removed slot looks the name up again.
    Removed,
}

impl SlotState {
    pub(crate) fn resident_mut(&mut self) -> Option<&mut Resident> {
        match self {
            SlotState::Resident(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn is_resident(&self) -> bool {
        matches!(self, SlotState::Resident(_))
    }

    pub(crate) fn public(&self) -> DomainState {
        match self {
            SlotState::Resident(r) => DomainState::Resident { dirty: r.dirty },
            _ => DomainState::Absent,
        }
    }
}

/// DomainSlot is the cache entry of one domain. Its mutex serializes loading,
/// mutation, queries and flushes of that domain.
pub(crate) struct DomainSlot {
    pub(crate) state: Arc<Mutex<SlotState>>,
    last_access: AtomicU64,
}

impl DomainSlot {
    pub(crate) fn new(tick: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState::Absent)),
            last_access: AtomicU64::new(tick),
        }
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}
