mod fractal;
mod matrix;

pub use fractal::{FractalKind, FractalLayout};
pub use matrix::{ColumnMajor, RowMajor};

/// Closed set of logical layouts a user-facing operand can carry. Kernel
/// specializations are selected against this tag, never against strides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutKind {
    RowMajor,
    ColumnMajor,
}
