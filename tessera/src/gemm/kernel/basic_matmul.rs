use crate::{
    arch::Resource,
    coord::{GemmCoord, MatrixCoord},
    data_type::Element,
    device::{GlobalTensor, launch_aic_only},
    gemm::{
        block::{BlockMmad, BlockScheduler},
        tile::LinearLayout,
    },
    layout::RowMajor,
};

/// Matrix-core-only pipeline: every core walks the scheduler's task list
/// with a stride of the core count, computing one output block per task
/// and storing it straight to C.
pub struct BasicMatmul<EIn: Element, EOut: Element, LA: LinearLayout, LB: LinearLayout, S> {
    pub a: GlobalTensor<EIn>,
    pub layout_a: LA,
    pub b: GlobalTensor<EIn>,
    pub layout_b: LB,
    pub c: GlobalTensor<EOut>,
    pub layout_c: RowMajor,
    pub scheduler: S,
    pub l1_tile: GemmCoord,
    pub l0_tile: GemmCoord,
}

impl<EIn, EOut, LA, LB, S> BasicMatmul<EIn, EOut, LA, LB, S>
where
    EIn: Element,
    EOut: Element<Accumulator = EIn::Accumulator>,
    LA: LinearLayout,
    LB: LinearLayout,
    S: BlockScheduler + Sync,
{
    pub fn run(&self, core_count: usize) {
        launch_aic_only(core_count, |context, _hub| {
            let mut resource = Resource::new();
            let mut block_mmad =
                BlockMmad::<EIn, EOut, LA, LB>::new(&mut resource, self.l1_tile, self.l0_tile);

            let core_loops = self.scheduler.core_loops();
            let mut task = context.pair_index as u32;
            while task < core_loops {
                let block = self.scheduler.block_coord(task);
                let actual = self.scheduler.actual_block_shape(block);
                let block_origin =
                    MatrixCoord::new(block.m * self.l1_tile.m, block.n * self.l1_tile.n);

                let offset_a = self.layout_a.offset(MatrixCoord::new(block_origin.row, 0));
                let offset_b = self
                    .layout_b
                    .offset(MatrixCoord::new(0, block_origin.column));
                let offset_c = self.layout_c.offset(block_origin);
                block_mmad.run(
                    self.a.at(offset_a),
                    &self.layout_a,
                    self.b.at(offset_b),
                    &self.layout_b,
                    self.c.at(offset_c),
                    &self.layout_c,
                    actual,
                );
                task += context.pair_count as u32;
            }
        });
    }
}
