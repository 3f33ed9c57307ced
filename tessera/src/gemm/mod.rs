pub mod block;
pub mod device;
pub mod kernel;
pub mod tile;
