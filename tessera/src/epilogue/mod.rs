mod block;
mod tile;

pub use block::{BlockEpilogueDequant, BlockEpilogueGemm, DequantParams};
pub use tile::{
    TileColumnBroadcastMul, TileElemWiseCast, TileRowBroadcastAdd, TileRowBroadcastMul,
};
