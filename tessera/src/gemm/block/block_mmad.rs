use crate::{
    arch::{C0_NUM_PER_FRACTAL, Resource, StageGuard, TileBuffer},
    coord::{GemmCoord, MatrixCoord, ceil_div, round_up},
    data_type::Element,
    device::GlobalTensor,
    gemm::tile::{
        CopyGmToL1, CopyL0cToGm, CopyL1ToL0A, CopyL1ToL0B, LinearLayout, TileMmad,
    },
    layout::{FractalLayout, RowMajor},
};

/// Staging depth of every double-buffered tier.
pub const STAGES: usize = 2;

/// Computes one output block: stages A and B through L1 and the L0
/// operand buffers with `STAGES`-deep rotation, prefetching the next K
/// slice while the matrix unit consumes the current one, and accumulates
/// the whole K extent into L0C before draining it to global memory.
pub struct BlockMmad<EIn: Element, EOut: Element, LA: LinearLayout, LB: LinearLayout> {
    l1_tile: GemmCoord,
    l0_tile: GemmCoord,
    l1a: [TileBuffer<EIn>; STAGES],
    l1b: [TileBuffer<EIn>; STAGES],
    l0a: [TileBuffer<EIn>; STAGES],
    l0b: [TileBuffer<EIn>; STAGES],
    l0c: TileBuffer<EIn::Accumulator>,
    l1_guard: StageGuard<STAGES>,
    l0a_guard: StageGuard<STAGES>,
    l0b_guard: StageGuard<STAGES>,
    copy_gm_to_l1a: CopyGmToL1<EIn, LA>,
    copy_gm_to_l1b: CopyGmToL1<EIn, LB>,
    copy_l1_to_l0a: CopyL1ToL0A<EIn>,
    copy_l1_to_l0b: CopyL1ToL0B<EIn>,
    copy_l0c_to_gm: CopyL0cToGm<EOut, RowMajor>,
    tile_mmad: TileMmad<EIn>,
}

impl<EIn, EOut, LA, LB> BlockMmad<EIn, EOut, LA, LB>
where
    EIn: Element,
    EOut: Element<Accumulator = EIn::Accumulator>,
    LA: LinearLayout,
    LB: LinearLayout,
{
    /// Per-stage staging footprint checks the host runs before launching.
    pub fn can_implement(l1_tile: GemmCoord, l0_tile: GemmCoord) -> bool {
        use crate::arch::AtlasA2;
        let elem = EIn::DATA_TYPE.size_in_bytes();
        let l1a = FractalLayout::zn::<EIn>(l1_tile.m, l1_tile.k).capacity() * elem;
        let l1b = FractalLayout::zn::<EIn>(l1_tile.k, l1_tile.n).capacity() * elem;
        if (l1a + l1b) * STAGES > AtlasA2::L1_SIZE {
            return false;
        }
        let l0a = FractalLayout::zz::<EIn>(l1_tile.m, l0_tile.k).capacity() * elem;
        let l0b = FractalLayout::nz::<EIn>(l0_tile.k, l1_tile.n).capacity() * elem;
        if l0a * STAGES > AtlasA2::L0A_SIZE || l0b * STAGES > AtlasA2::L0B_SIZE {
            return false;
        }
        let acc = EIn::DATA_TYPE.accumulator().size_in_bytes();
        let l0c = FractalLayout::zn_l0c(MatrixCoord::new(
            round_up(l1_tile.m, C0_NUM_PER_FRACTAL),
            round_up(l1_tile.n, C0_NUM_PER_FRACTAL),
        ))
        .capacity()
            * acc;
        if l0c > AtlasA2::L0C_SIZE {
            return false;
        }
        // L1 and L0 blocks may only differ along K.
        l1_tile.m == l0_tile.m && l1_tile.n == l0_tile.n
    }

    pub fn new(resource: &mut Resource, l1_tile: GemmCoord, l0_tile: GemmCoord) -> Self {
        debug_assert!(Self::can_implement(l1_tile, l0_tile));
        let l1a_len = FractalLayout::zn::<EIn>(l1_tile.m, l1_tile.k).capacity();
        let l1b_len = FractalLayout::zn::<EIn>(l1_tile.k, l1_tile.n).capacity();
        let l0a_len = FractalLayout::zz::<EIn>(l1_tile.m, l0_tile.k).capacity();
        let l0b_len = FractalLayout::nz::<EIn>(l0_tile.k, l1_tile.n).capacity();
        let l0c_len = FractalLayout::zn_l0c(MatrixCoord::new(
            round_up(l1_tile.m, C0_NUM_PER_FRACTAL),
            round_up(l1_tile.n, C0_NUM_PER_FRACTAL),
        ))
        .capacity();
        Self {
            l1_tile,
            l0_tile,
            l1a: [resource.l1.alloc(l1a_len), resource.l1.alloc(l1a_len)],
            l1b: [resource.l1.alloc(l1b_len), resource.l1.alloc(l1b_len)],
            l0a: [resource.l0a.alloc(l0a_len), resource.l0a.alloc(l0a_len)],
            l0b: [resource.l0b.alloc(l0b_len), resource.l0b.alloc(l0b_len)],
            l0c: resource.l0c.alloc(l0c_len),
            l1_guard: StageGuard::new(),
            l0a_guard: StageGuard::new(),
            l0b_guard: StageGuard::new(),
            copy_gm_to_l1a: CopyGmToL1::new(),
            copy_gm_to_l1b: CopyGmToL1::new(),
            copy_l1_to_l0a: CopyL1ToL0A::new(),
            copy_l1_to_l0b: CopyL1ToL0B::new(),
            copy_l0c_to_gm: CopyL0cToGm::new(),
            tile_mmad: TileMmad::new(),
        }
    }

    fn load_k_slice(
        &mut self,
        slot: usize,
        gm_a: GlobalTensor<EIn>,
        layout_a: &LA,
        gm_b: GlobalTensor<EIn>,
        layout_b: &LB,
        actual: GemmCoord,
        k_index: u32,
        k_actual: u32,
    ) {
        let layout_a_l1 = FractalLayout::zn::<EIn>(self.l1_tile.m, self.l1_tile.k);
        let layout_b_l1 = FractalLayout::zn::<EIn>(self.l1_tile.k, self.l1_tile.n);

        let a_origin = MatrixCoord::new(0, k_index * self.l1_tile.k);
        let tile_a = gm_a.at(layout_a.offset(a_origin));
        let layout_tile_a = layout_a.tile(MatrixCoord::new(actual.m, k_actual));
        self.copy_gm_to_l1a
            .copy(self.l1a[slot].as_mut_slice(), &layout_a_l1, tile_a, &layout_tile_a);

        let b_origin = MatrixCoord::new(k_index * self.l1_tile.k, 0);
        let tile_b = gm_b.at(layout_b.offset(b_origin));
        let layout_tile_b = layout_b.tile(MatrixCoord::new(k_actual, actual.n));
        self.copy_gm_to_l1b
            .copy(self.l1b[slot].as_mut_slice(), &layout_b_l1, tile_b, &layout_tile_b);
    }

    /// One block-scoped multiply-accumulate: C[block] = A[block-row] *
    /// B[block-column], written out through the narrowing L0C drain.
    pub fn run(
        &mut self,
        gm_a: GlobalTensor<EIn>,
        layout_a: &LA,
        gm_b: GlobalTensor<EIn>,
        layout_b: &LB,
        gm_c: GlobalTensor<EOut>,
        layout_c: &RowMajor,
        actual: GemmCoord,
    ) {
        let m_round = round_up(actual.m, C0_NUM_PER_FRACTAL);
        let n_round = round_up(actual.n, C0_NUM_PER_FRACTAL);
        let layout_c_l0 = FractalLayout::zn_l0c(MatrixCoord::new(m_round, n_round));
        let layout_a_l1 = FractalLayout::zn::<EIn>(self.l1_tile.m, self.l1_tile.k);
        let layout_b_l1 = FractalLayout::zn::<EIn>(self.l1_tile.k, self.l1_tile.n);

        let k_slices = ceil_div(actual.k, self.l1_tile.k);
        let mut k_actual = actual.k.min(self.l1_tile.k);

        // First K slice loads ahead of the compute loop.
        let mut l1_slot = self.l1_guard.acquire(0);
        self.load_k_slice(l1_slot, gm_a, layout_a, gm_b, layout_b, actual, 0, k_actual);

        let m_parts = ceil_div(m_round, self.l0_tile.m);
        let n_parts = ceil_div(n_round, self.l0_tile.n);

        for k_slice in 0..k_slices {
            let mut k_actual_next = 0;
            if k_slice + 1 < k_slices {
                // Prefetch the next slice into the other stage while this
                // one is consumed.
                k_actual_next = self.l1_tile.k.min(actual.k - (k_slice + 1) * self.l1_tile.k);
                let next = self.l1_guard.acquire(k_slice as usize + 1);
                self.load_k_slice(
                    next,
                    gm_a,
                    layout_a,
                    gm_b,
                    layout_b,
                    actual,
                    k_slice + 1,
                    k_actual_next,
                );
            }

            let k_parts = ceil_div(k_actual, self.l0_tile.k);
            for m_part in 0..m_parts {
                let m_part_actual = if m_part + 1 < m_parts {
                    self.l0_tile.m
                } else {
                    m_round - m_part * self.l0_tile.m
                };
                for k_part in 0..k_parts {
                    let k_part_actual = if k_part + 1 < k_parts {
                        self.l0_tile.k
                    } else {
                        k_actual - k_part * self.l0_tile.k
                    };

                    let l0a_loop = ((k_slice * m_parts + m_part) * k_parts + k_part) as usize;
                    let l0a_slot = self.l0a_guard.acquire(l0a_loop);
                    let layout_a_l0 = FractalLayout::zz::<EIn>(m_part_actual, k_part_actual);
                    let a_origin = MatrixCoord::new(
                        m_part * self.l0_tile.m,
                        k_part * self.l0_tile.k,
                    );
                    let a_base = layout_a_l1.offset(a_origin) as usize;
                    let layout_a_view =
                        layout_a_l1.tile(MatrixCoord::new(m_part_actual, k_part_actual));
                    self.copy_l1_to_l0a.copy(
                        self.l0a[l0a_slot].as_mut_slice(),
                        &layout_a_l0,
                        &self.l1a[l1_slot].as_slice()[a_base..],
                        &layout_a_view,
                    );

                    for n_part in 0..n_parts {
                        let n_part_actual = if n_part + 1 < n_parts {
                            self.l0_tile.n
                        } else {
                            n_round - n_part * self.l0_tile.n
                        };

                        let l0b_loop = (l0a_loop * n_parts as usize) + n_part as usize;
                        let l0b_slot = self.l0b_guard.acquire(l0b_loop);
                        let layout_b_l0 = FractalLayout::nz::<EIn>(k_part_actual, n_part_actual);
                        let b_origin = MatrixCoord::new(
                            k_part * self.l0_tile.k,
                            n_part * self.l0_tile.n,
                        );
                        let b_base = layout_b_l1.offset(b_origin) as usize;
                        let layout_b_view =
                            layout_b_l1.tile(MatrixCoord::new(k_part_actual, n_part_actual));
                        self.copy_l1_to_l0b.copy(
                            self.l0b[l0b_slot].as_mut_slice(),
                            &layout_b_l0,
                            &self.l1b[l1_slot].as_slice()[b_base..],
                            &layout_b_view,
                        );

                        let c_origin =
                            MatrixCoord::new(m_part * self.l0_tile.m, n_part * self.l0_tile.n);
                        let c_base = layout_c_l0.offset(c_origin) as usize;
                        let layout_c_view = layout_c_l0
                            .tile(MatrixCoord::new(m_part_actual, n_part_actual));
                        let init_c = k_slice == 0 && k_part == 0;
                        self.tile_mmad.mmad(
                            &mut self.l0c.as_mut_slice()[c_base..],
                            &layout_c_view,
                            self.l0a[l0a_slot].as_slice(),
                            &layout_a_l0,
                            self.l0b[l0b_slot].as_slice(),
                            &layout_b_l0,
                            GemmCoord::new(m_part_actual, n_part_actual, k_part_actual),
                            init_c,
                        );
                        self.l0b_guard.release(l0b_loop);
                    }
                    self.l0a_guard.release(l0a_loop);
                }
            }

            self.l1_guard.release(k_slice as usize);
            l1_slot = (l1_slot + 1) % STAGES;
            k_actual = k_actual_next;
        }

        let layout_block = layout_c.tile(actual.mn());
        self.copy_l0c_to_gm
            .copy(gm_c, &layout_block, self.l0c.as_slice(), &layout_c_l0);
    }
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;

    #[test]
    fn tile_footprints_are_validated() {
        assert!(BlockMmad::<f16, f16, RowMajor, RowMajor>::can_implement(
            GemmCoord::new(128, 256, 256),
            GemmCoord::new(128, 256, 64),
        ));
        // A 512-deep K stage at this width cannot double-buffer in L1.
        assert!(!BlockMmad::<f16, f16, RowMajor, RowMajor>::can_implement(
            GemmCoord::new(256, 512, 512),
            GemmCoord::new(256, 512, 64),
        ));
        // M/N must match between the L1 and L0 blocks.
        assert!(!BlockMmad::<f16, f16, RowMajor, RowMajor>::can_implement(
            GemmCoord::new(128, 256, 256),
            GemmCoord::new(64, 256, 64),
        ));
    }
}
