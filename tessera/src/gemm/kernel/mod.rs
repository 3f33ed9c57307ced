mod basic_matmul;
mod grouped_matmul;
mod matmul_epilogue;

pub use basic_matmul::BasicMatmul;
pub use grouped_matmul::{GroupList, GroupShape, GroupedMatmul, MAX_GROUP_COUNT};
pub use matmul_epilogue::{MatmulEpilogue, QuantMatmul};
