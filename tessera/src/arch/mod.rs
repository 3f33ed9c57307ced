mod resource;
mod sync;

pub use resource::{Resource, StageGuard, TierArena, TileBuffer};
pub use sync::{CrossCoreFlag, FLAG_COUNT, FlagId, PIPE_DEPTH, SyncHub};

/// Fixed-size unit of the hardware fractal grid: one C0 burst is 32 bytes
/// and one fractal is 16 such bursts (512 bytes).
pub const BYTE_PER_C0: usize = 32;
pub const C0_NUM_PER_FRACTAL: u32 = 16;
pub const BYTE_PER_FRACTAL: usize = BYTE_PER_C0 * C0_NUM_PER_FRACTAL as usize;

/// Largest source stride (in elements) a single strided DMA descriptor can
/// express; longer strides force the copy to split into sub-copies.
pub const STRIDE_LIMIT: u32 = 65536;

/// Vector cores paired with each matrix core.
pub const AIV_PER_AIC: usize = 2;

/// On-chip memory tier capacities of the target architecture.
#[derive(Debug, Clone, Copy)]
pub struct AtlasA2;

impl AtlasA2 {
    pub const L1_SIZE: usize = 512 * 1024;
    pub const L0A_SIZE: usize = 64 * 1024;
    pub const L0B_SIZE: usize = 64 * 1024;
    pub const L0C_SIZE: usize = 128 * 1024;
    pub const UB_SIZE: usize = 192 * 1024;
}

pub const fn ele_num_per_c0(element_size: usize) -> u32 {
    (BYTE_PER_C0 / element_size) as u32
}

pub const fn ele_num_per_fractal(element_size: usize) -> u32 {
    (BYTE_PER_FRACTAL / element_size) as u32
}
