mod block_mmad;
mod scheduler;

pub use block_mmad::{BlockMmad, STAGES};
pub use scheduler::{
    AnyBlockScheduler, BlockScheduler, IdentityBlockScheduler, L2TileScheduler,
    L2_TILE_THRESHOLD, MAX_SPLIT_TILE_NUM, MIN_SPLIT_TILE_NUM, SwizzleDirection,
};
