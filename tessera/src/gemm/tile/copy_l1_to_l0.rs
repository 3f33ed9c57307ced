use std::marker::PhantomData;

use crate::{coord::MatrixCoord, data_type::Element, layout::FractalLayout};

fn rearrange<E: Element>(
    dst: &mut [E],
    layout_dst: &FractalLayout,
    src: &[E],
    layout_src: &FractalLayout,
) {
    // Whole rounded fractals move, padding included; the matrix unit only
    // consumes the actual extents.
    for row in 0..layout_dst.rows_round() {
        for column in 0..layout_dst.cols_round() {
            let coord = MatrixCoord::new(row, column);
            dst[layout_dst.offset(coord) as usize] = src[layout_src.offset(coord) as usize];
        }
    }
}

/// Moves a zN sub-tile of the staged A operand from L1 into the zZ
/// arrangement the left matrix-unit port requires.
pub struct CopyL1ToL0A<E> {
    _marker: PhantomData<E>,
}

impl<E: Element> CopyL1ToL0A<E> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// `src` starts at the fractal-aligned origin of the sub-tile inside
    /// the L1 buffer; `layout_src` is the tile view carrying the parent's
    /// strides.
    pub fn copy(
        &self,
        dst: &mut [E],
        layout_dst: &FractalLayout,
        src: &[E],
        layout_src: &FractalLayout,
    ) {
        rearrange(dst, layout_dst, src, layout_src);
    }
}

impl<E: Element> Default for CopyL1ToL0A<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Moves a zN sub-tile of the staged B operand from L1 into the nZ
/// arrangement the right matrix-unit port requires.
pub struct CopyL1ToL0B<E> {
    _marker: PhantomData<E>,
}

impl<E: Element> CopyL1ToL0B<E> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn copy(
        &self,
        dst: &mut [E],
        layout_dst: &FractalLayout,
        src: &[E],
        layout_src: &FractalLayout,
    ) {
        rearrange(dst, layout_dst, src, layout_src);
    }
}

impl<E: Element> Default for CopyL1ToL0B<E> {
    fn default() -> Self {
        Self::new()
    }
}
