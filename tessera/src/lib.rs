pub mod arch;
pub mod conv2d;
pub mod coord;
pub mod data_type;
pub mod device;
pub mod epilogue;
pub mod error;
pub mod gemm;
pub mod gemv;
pub mod layout;
pub mod mla;

pub use coord::{GemmCoord, MatrixCoord};
pub use data_type::{DataType, Element};
pub use device::{DeviceBuffer, GlobalTensor};
pub use error::KernelError;
