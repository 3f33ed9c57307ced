use std::marker::PhantomData;

use crate::{
    coord::{GemmCoord, MatrixCoord},
    data_type::{Accumulator, Element},
    layout::FractalLayout,
};

/// One matrix-unit issue: multiplies a zZ-staged A sub-tile by an
/// nZ-staged B sub-tile and accumulates into the zN L0C tile, always in
/// the widened accumulator type. Only the actual extents participate, so
/// fractal padding never contaminates boundary results.
pub struct TileMmad<E> {
    _marker: PhantomData<E>,
}

impl<E: Element> TileMmad<E> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// `init_c` selects overwrite for the first K sub-tile and accumulate
    /// for the rest.
    #[allow(clippy::too_many_arguments)]
    pub fn mmad(
        &self,
        c: &mut [E::Accumulator],
        layout_c: &FractalLayout,
        a: &[E],
        layout_a: &FractalLayout,
        b: &[E],
        layout_b: &FractalLayout,
        shape: GemmCoord,
        init_c: bool,
    ) {
        for m in 0..shape.m {
            for n in 0..shape.n {
                let out = layout_c.offset(MatrixCoord::new(m, n)) as usize;
                let mut value = if init_c {
                    E::Accumulator::zero()
                } else {
                    c[out]
                };
                for k in 0..shape.k {
                    let lhs = a[layout_a.offset(MatrixCoord::new(m, k)) as usize];
                    let rhs = b[layout_b.offset(MatrixCoord::new(k, n)) as usize];
                    value = value.mul_add(lhs.to_accumulator(), rhs.to_accumulator());
                }
                c[out] = value;
            }
        }
    }
}

impl<E: Element> Default for TileMmad<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;

    fn stage<E: Element>(layout: &FractalLayout, values: &[f32], columns: u32) -> Vec<E> {
        let mut staged = vec![E::zeroed(); layout.capacity()];
        for (index, &value) in values.iter().enumerate() {
            let coord = MatrixCoord::new(index as u32 / columns, index as u32 % columns);
            staged[layout.offset(coord) as usize] =
                num_traits::cast(value).unwrap_or_else(E::zeroed);
        }
        staged
    }

    #[test]
    fn accumulates_in_f32_across_k_steps() {
        let shape = GemmCoord::new(2, 2, 3);
        let layout_a = FractalLayout::zz::<f16>(shape.m, shape.k);
        let layout_b = FractalLayout::nz::<f16>(shape.k, shape.n);
        let layout_c = FractalLayout::zn_l0c(shape.mn());

        let a = stage::<f16>(&layout_a, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], shape.k);
        let b = stage::<f16>(&layout_b, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0], shape.n);
        let mut c = vec![0.0f32; layout_c.capacity()];

        let mmad = TileMmad::<f16>::new();
        mmad.mmad(&mut c, &layout_c, &a, &layout_a, &b, &layout_b, shape, true);
        // Second issue accumulates on top of the first.
        mmad.mmad(&mut c, &layout_c, &a, &layout_a, &b, &layout_b, shape, false);

        // A @ B = [[4, 5], [10, 11]], doubled by the second issue.
        assert_eq!(c[layout_c.offset(MatrixCoord::new(0, 0)) as usize], 8.0);
        assert_eq!(c[layout_c.offset(MatrixCoord::new(0, 1)) as usize], 10.0);
        assert_eq!(c[layout_c.offset(MatrixCoord::new(1, 0)) as usize], 20.0);
        assert_eq!(c[layout_c.offset(MatrixCoord::new(1, 1)) as usize], 22.0);
    }

    #[test]
    fn integer_path_widens_to_i32() {
        let shape = GemmCoord::new(1, 1, 4);
        let layout_a = FractalLayout::zz::<i8>(shape.m, shape.k);
        let layout_b = FractalLayout::nz::<i8>(shape.k, shape.n);
        let layout_c = FractalLayout::zn_l0c(shape.mn());

        let a = stage::<i8>(&layout_a, &[100.0, 100.0, 100.0, 100.0], shape.k);
        let b = stage::<i8>(&layout_b, &[100.0, 100.0, 100.0, 100.0], shape.n);
        let mut c = vec![0i32; layout_c.capacity()];

        TileMmad::<i8>::new().mmad(&mut c, &layout_c, &a, &layout_a, &b, &layout_b, shape, true);
        // 4 * 100 * 100 overflows i8 arithmetic but not the accumulator.
        assert_eq!(c[layout_c.offset(MatrixCoord::new(0, 0)) as usize], 40_000);
    }
}
