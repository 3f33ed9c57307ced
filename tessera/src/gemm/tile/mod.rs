mod copy_gm_to_l1;
mod copy_l0c_to_gm;
mod copy_l1_to_l0;
mod tile_mmad;

pub use copy_gm_to_l1::CopyGmToL1;
pub use copy_l0c_to_gm::CopyL0cToGm;
pub use copy_l1_to_l0::{CopyL1ToL0A, CopyL1ToL0B};
pub use tile_mmad::TileMmad;

use crate::{
    coord::MatrixCoord,
    layout::{ColumnMajor, LayoutKind, RowMajor},
};

/// A logical (shape, stride) layout a global-memory operand can carry.
/// Implemented by the closed set of linear layouts; the fractal staging
/// arrangement each one maps to is fixed per specialization.
pub trait LinearLayout: Copy + Send + Sync {
    const KIND: LayoutKind;

    fn shape(&self) -> MatrixCoord;
    fn offset(&self, coord: MatrixCoord) -> i64;
    /// Elements between adjacent entries of the slow dimension; what the
    /// DMA stride-limit check is applied to.
    fn leading_stride(&self) -> i64;
    fn tile(&self, shape: MatrixCoord) -> Self;
}

impl LinearLayout for RowMajor {
    const KIND: LayoutKind = LayoutKind::RowMajor;

    fn shape(&self) -> MatrixCoord {
        self.shape
    }

    fn offset(&self, coord: MatrixCoord) -> i64 {
        RowMajor::offset(self, coord)
    }

    fn leading_stride(&self) -> i64 {
        self.stride
    }

    fn tile(&self, shape: MatrixCoord) -> Self {
        RowMajor::tile(self, shape)
    }
}

impl LinearLayout for ColumnMajor {
    const KIND: LayoutKind = LayoutKind::ColumnMajor;

    fn shape(&self) -> MatrixCoord {
        self.shape
    }

    fn offset(&self, coord: MatrixCoord) -> i64 {
        ColumnMajor::offset(self, coord)
    }

    fn leading_stride(&self) -> i64 {
        self.stride
    }

    fn tile(&self, shape: MatrixCoord) -> Self {
        ColumnMajor::tile(self, shape)
    }
}
