use std::marker::PhantomData;

use super::LinearLayout;
use crate::{coord::MatrixCoord, data_type::Element, device::GlobalTensor, layout::FractalLayout};

/// Drains the zN accumulator tile from L0C to a linear global matrix,
/// narrowing to the destination element type on the way out. Only the
/// actual tile extents are written, so boundary tiles never spill padding
/// into neighbouring output.
pub struct CopyL0cToGm<E, L> {
    _marker: PhantomData<(E, L)>,
}

impl<E: Element, L: LinearLayout> CopyL0cToGm<E, L> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn copy(
        &self,
        dst: GlobalTensor<E>,
        layout_dst: &L,
        src: &[E::Accumulator],
        layout_src: &FractalLayout,
    ) {
        let shape = layout_dst.shape();
        for row in 0..shape.row {
            for column in 0..shape.column {
                let coord = MatrixCoord::new(row, column);
                let value = src[layout_src.offset(coord) as usize];
                dst.write(layout_dst.offset(coord), E::from_accumulator(value));
            }
        }
    }
}

impl<E: Element, L: LinearLayout> Default for CopyL0cToGm<E, L> {
    fn default() -> Self {
        Self::new()
    }
}
