use std::sync::{
    Barrier,
    atomic::{AtomicU32, Ordering},
};

pub type FlagId = u8;

/// Hardware flag ids available to one core pair.
pub const FLAG_COUNT: usize = 16;

/// How many tiles the producing role may run ahead of the slowest consumer
/// on one flag before `set` blocks. Matches the staging depth of the
/// double-buffered pipelines.
pub const PIPE_DEPTH: u32 = 2;

/// A cross-core semaphore identified by a primary id and a reverse
/// (acknowledge) companion id. The reverse id is what keeps a flag reusable
/// across many tile iterations without a stale satisfied read: the producer
/// may only advance while the consumers' acknowledge counter is within
/// `PIPE_DEPTH` tiles of its own set counter. `consumers` is how many cores
/// acknowledge each set; every one of them must call `wait` exactly once
/// per tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossCoreFlag {
    pub id: FlagId,
    pub reverse_id: FlagId,
    pub consumers: u32,
}

impl CrossCoreFlag {
    pub const fn new(id: FlagId, reverse_id: FlagId, consumers: u32) -> Self {
        Self {
            id,
            reverse_id,
            consumers,
        }
    }
}

struct PairFlags {
    counters: [AtomicU32; FLAG_COUNT],
}

impl PairFlags {
    fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }
}

/// Flag state for every matrix-core/vector-core pair of one kernel launch,
/// plus the launch-wide start barrier. Owned by the launch context and
/// passed explicitly to both roles; flags never outlive one invocation.
pub struct SyncHub {
    pairs: Vec<PairFlags>,
    start_barrier: Barrier,
}

impl SyncHub {
    pub fn new(pair_count: usize, thread_count: usize) -> Self {
        Self {
            pairs: (0..pair_count).map(|_| PairFlags::new()).collect(),
            start_barrier: Barrier::new(thread_count),
        }
    }

    /// All cores rendezvous here before entering their loops.
    pub fn wait_start(&self) {
        self.start_barrier.wait();
    }

    /// Producer side. Publishes "tile `seq` is durably stored" after
    /// throttling against the consumers' acknowledge counter.
    pub fn set_flag_with_reverse(&self, pair: usize, flag: CrossCoreFlag) {
        let flags = &self.pairs[pair];
        let seq = flags.counters[flag.id as usize].load(Ordering::Relaxed);
        if seq + 1 > PIPE_DEPTH {
            let needed = (seq + 1 - PIPE_DEPTH) * flag.consumers;
            while flags.counters[flag.reverse_id as usize].load(Ordering::Acquire) < needed {
                std::hint::spin_loop();
            }
        }
        flags.counters[flag.id as usize].store(seq + 1, Ordering::Release);
    }

    /// Consumer side. Blocks until the producer has set the flag for tile
    /// `seq` (the consumer's own iteration ordinal on this flag), then
    /// acknowledges through the reverse id.
    pub fn wait_flag_with_reverse(&self, pair: usize, flag: CrossCoreFlag, seq: u32) {
        let flags = &self.pairs[pair];
        while flags.counters[flag.id as usize].load(Ordering::Acquire) <= seq {
            std::hint::spin_loop();
        }
        flags.counters[flag.reverse_id as usize].fetch_add(1, Ordering::Release);
    }
}
