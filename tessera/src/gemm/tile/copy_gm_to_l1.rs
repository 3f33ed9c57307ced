use std::marker::PhantomData;

use super::LinearLayout;
use crate::{
    arch::STRIDE_LIMIT,
    coord::MatrixCoord,
    data_type::Element,
    device::GlobalTensor,
    layout::{FractalLayout, LayoutKind},
};

/// Stages one logical tile of a linear global matrix into the zN
/// arrangement of an L1 buffer. The fractal padding of the destination is
/// zero-filled so partial boundary tiles feed the matrix unit whole
/// fractals.
pub struct CopyGmToL1<E, L> {
    _marker: PhantomData<(E, L)>,
}

impl<E: Element, L: LinearLayout> CopyGmToL1<E, L> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn copy(
        &self,
        dst: &mut [E],
        layout_dst: &FractalLayout,
        src: GlobalTensor<E>,
        layout_src: &L,
    ) {
        dst[..layout_dst.capacity()].fill(E::zeroed());
        if layout_src.leading_stride() < STRIDE_LIMIT as i64 {
            self.copy_strided(dst, layout_dst, src, layout_src);
        } else {
            self.copy_by_lines(dst, layout_dst, src, layout_src);
        }
    }

    /// Single strided transfer covering the whole tile.
    fn copy_strided(
        &self,
        dst: &mut [E],
        layout_dst: &FractalLayout,
        src: GlobalTensor<E>,
        layout_src: &L,
    ) {
        let shape = layout_src.shape();
        for row in 0..shape.row {
            for column in 0..shape.column {
                let coord = MatrixCoord::new(row, column);
                dst[layout_dst.offset(coord) as usize] = src.read(layout_src.offset(coord));
            }
        }
    }

    /// Fallback when the leading stride exceeds what one transfer
    /// descriptor can express: one sub-copy per line of the slow
    /// dimension, each re-based so its own stride stays representable.
    fn copy_by_lines(
        &self,
        dst: &mut [E],
        layout_dst: &FractalLayout,
        src: GlobalTensor<E>,
        layout_src: &L,
    ) {
        let shape = layout_src.shape();
        let lines = match L::KIND {
            LayoutKind::RowMajor => shape.row,
            LayoutKind::ColumnMajor => shape.column,
        };
        for line in 0..lines {
            let origin = match L::KIND {
                LayoutKind::RowMajor => MatrixCoord::new(line, 0),
                LayoutKind::ColumnMajor => MatrixCoord::new(0, line),
            };
            let base = layout_src.offset(origin);
            let src_line = src.at(base);
            let in_line = match L::KIND {
                LayoutKind::RowMajor => shape.column,
                LayoutKind::ColumnMajor => shape.row,
            };
            for index in 0..in_line {
                let coord = match L::KIND {
                    LayoutKind::RowMajor => MatrixCoord::new(line, index),
                    LayoutKind::ColumnMajor => MatrixCoord::new(index, line),
                };
                let inner = layout_src.offset(coord) - base;
                dst[layout_dst.offset(coord) as usize] = src_line.read(inner);
            }
        }
    }
}

impl<E: Element, L: LinearLayout> Default for CopyGmToL1<E, L> {
    fn default() -> Self {
        Self::new()
    }
}
