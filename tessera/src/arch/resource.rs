use crate::{arch::AtlasA2, data_type::Element};

/// Owned staging area carved out of one on-chip memory tier.
pub struct TileBuffer<E> {
    data: Box<[E]>,
}

impl<E: Element> TileBuffer<E> {
    fn new(len: usize) -> Self {
        Self {
            data: vec![E::zeroed(); len].into_boxed_slice(),
        }
    }

    pub fn as_slice(&self) -> &[E] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [E] {
        &mut self.data
    }

    pub fn fill_zero(&mut self) {
        self.data.fill(E::zeroed());
    }
}

/// Budgeted allocator for one tier. Tile shapes are validated host-side by
/// `can_implement`; exceeding a tier here is a construction bug, so it
/// aborts the kernel rather than returning an error.
pub struct TierArena {
    name: &'static str,
    capacity: usize,
    used: usize,
}

impl TierArena {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            used: 0,
        }
    }

    pub fn alloc<E: Element>(&mut self, elements: usize) -> TileBuffer<E> {
        let bytes = elements * E::DATA_TYPE.size_in_bytes();
        assert!(
            self.used + bytes <= self.capacity,
            "{} tier exhausted: {} + {} exceeds {}",
            self.name,
            self.used,
            bytes,
            self.capacity
        );
        self.used += bytes;
        TileBuffer::new(elements)
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }
}

/// Per-core on-chip memory, one arena per tier.
pub struct Resource {
    pub l1: TierArena,
    pub l0a: TierArena,
    pub l0b: TierArena,
    pub l0c: TierArena,
    pub ub: TierArena,
}

impl Resource {
    pub fn new() -> Self {
        Self {
            l1: TierArena::new("L1", AtlasA2::L1_SIZE),
            l0a: TierArena::new("L0A", AtlasA2::L0A_SIZE),
            l0b: TierArena::new("L0B", AtlasA2::L0B_SIZE),
            l0c: TierArena::new("L0C", AtlasA2::L0C_SIZE),
            ub: TierArena::new("UB", AtlasA2::UB_SIZE),
        }
    }
}

impl Default for Resource {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard over `N` staging slots rotated by loop index. The producer must
/// acquire a slot before refilling it and release it when the consumer side
/// is done; acquiring a slot that was never released is the double-buffer
/// reuse bug this type exists to catch.
pub struct StageGuard<const N: usize> {
    busy: [bool; N],
}

impl<const N: usize> StageGuard<N> {
    pub const STAGES: usize = N;

    pub fn new() -> Self {
        Self {
            busy: [false; N],
        }
    }

    pub fn acquire(&mut self, loop_index: usize) -> usize {
        let slot = loop_index % N;
        debug_assert!(!self.busy[slot], "staging slot {slot} acquired while still in flight");
        self.busy[slot] = true;
        slot
    }

    pub fn release(&mut self, loop_index: usize) {
        let slot = loop_index % N;
        debug_assert!(self.busy[slot], "staging slot {slot} released without acquire");
        self.busy[slot] = false;
    }
}

impl<const N: usize> Default for StageGuard<N> {
    fn default() -> Self {
        Self::new()
    }
}
