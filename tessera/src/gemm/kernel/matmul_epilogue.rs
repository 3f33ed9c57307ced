use crate::{
    arch::{AIV_PER_AIC, CrossCoreFlag, Resource},
    coord::{GemmCoord, MatrixCoord},
    data_type::Element,
    device::{GlobalTensor, launch},
    epilogue::{BlockEpilogueDequant, BlockEpilogueGemm, DequantParams},
    gemm::{
        block::{BlockMmad, BlockScheduler},
        tile::LinearLayout,
    },
    layout::RowMajor,
};

/// Handoff flag from the matrix core to the two vector cores of its pair:
/// "this task's block is durably stored in the workspace".
const FLAG_AIC_STORE: CrossCoreFlag = CrossCoreFlag::new(0, 1, AIV_PER_AIC as u32);

/// Split pipeline: the matrix core accumulates each block into a
/// global-memory workspace, and its pair's vector cores fold the staged
/// block with C into `D = alpha * X + beta * C`. Both roles walk the same
/// scheduler task list, so one counter flag per pair is enough to order
/// every store against its consumption.
pub struct MatmulEpilogue<E: Element, LA: LinearLayout, LB: LinearLayout, S> {
    pub problem: GemmCoord,
    pub a: GlobalTensor<E>,
    pub layout_a: LA,
    pub b: GlobalTensor<E>,
    pub layout_b: LB,
    pub workspace: GlobalTensor<E>,
    pub c: GlobalTensor<E>,
    pub layout_c: RowMajor,
    pub d: GlobalTensor<E>,
    pub layout_d: RowMajor,
    pub alpha: f32,
    pub beta: f32,
    pub scheduler: S,
    pub l1_tile: GemmCoord,
    pub l0_tile: GemmCoord,
}

impl<E, LA, LB, S> MatmulEpilogue<E, LA, LB, S>
where
    E: Element,
    LA: LinearLayout,
    LB: LinearLayout,
    S: BlockScheduler + Sync,
{
    pub fn run(&self, pair_count: usize) {
        let layout_workspace = RowMajor::new(self.problem.m, self.problem.n);
        launch(
            pair_count,
            |context, hub| {
                let mut resource = Resource::new();
                let mut block_mmad = BlockMmad::<E, E, LA, LB>::new(
                    &mut resource,
                    self.l1_tile,
                    self.l0_tile,
                );

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
                    let offset_x = layout_workspace.offset(block_origin);
                    block_mmad.run(
                        self.a.at(offset_a),
                        &self.layout_a,
                        self.b.at(offset_b),
                        &self.layout_b,
                        self.workspace.at(offset_x),
                        &layout_workspace,
                        actual,
                    );
                    hub.set_flag_with_reverse(context.pair_index, FLAG_AIC_STORE);
                    task += context.pair_count as u32;
                }
            },
            |context, hub| {
                let mut resource = Resource::new();
                let mut epilogue = BlockEpilogueGemm::<E>::new(
                    &mut resource,
                    MatrixCoord::new(self.l1_tile.m, self.l1_tile.n),
                );

                let core_loops = self.scheduler.core_loops();
                let mut task = context.pair_index as u32;
                let mut ordinal = 0;
                while task < core_loops {
                    let block = self.scheduler.block_coord(task);
                    let actual = self.scheduler.actual_block_shape(block);
                    let block_origin =
                        MatrixCoord::new(block.m * self.l1_tile.m, block.n * self.l1_tile.n);

                    hub.wait_flag_with_reverse(context.pair_index, FLAG_AIC_STORE, ordinal);
                    epilogue.run(
                        context.subcore_index,
                        self.workspace.at(layout_workspace.offset(block_origin)),
                        &layout_workspace,
                        self.c.at(self.layout_c.offset(block_origin)),
                        &self.layout_c,
                        self.d.at(self.layout_d.offset(block_origin)),
                        &self.layout_d,
                        actual.mn(),
                        self.alpha,
                        self.beta,
                    );
                    ordinal += 1;
                    task += context.pair_count as u32;
                }
            },
        );
    }
}

/// Quantized variant of the split pipeline: i8 operands accumulate into an
/// i32 workspace, and the vector cores dequantize each staged block with
/// the per-column weight scale, the per-row activation scale and the
/// optional bias before narrowing into the output type.
pub struct QuantMatmul<EOut: Element, LA: LinearLayout, LB: LinearLayout, S> {
    pub problem: GemmCoord,
    pub a: GlobalTensor<i8>,
    pub layout_a: LA,
    pub b: GlobalTensor<i8>,
    pub layout_b: LB,
    pub workspace: GlobalTensor<i32>,
    pub d: GlobalTensor<EOut>,
    pub layout_d: RowMajor,
    pub scale: GlobalTensor<f32>,
    pub per_token_scale: GlobalTensor<f32>,
    pub bias: GlobalTensor<f32>,
    pub scheduler: S,
    pub l1_tile: GemmCoord,
    pub l0_tile: GemmCoord,
}

impl<EOut, LA, LB, S> QuantMatmul<EOut, LA, LB, S>
where
    EOut: Element,
    LA: LinearLayout,
    LB: LinearLayout,
    S: BlockScheduler + Sync,
{
    pub fn run(&self, pair_count: usize) {
        let layout_workspace = RowMajor::new(self.problem.m, self.problem.n);
        launch(
            pair_count,
            |context, hub| {
                let mut resource = Resource::new();
                let mut block_mmad = BlockMmad::<i8, i32, LA, LB>::new(
                    &mut resource,
                    self.l1_tile,
                    self.l0_tile,
                );

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
                    block_mmad.run(
                        self.a.at(offset_a),
                        &self.layout_a,
                        self.b.at(offset_b),
                        &self.layout_b,
                        self.workspace.at(layout_workspace.offset(block_origin)),
                        &layout_workspace,
                        actual,
                    );
                    hub.set_flag_with_reverse(context.pair_index, FLAG_AIC_STORE);
                    task += context.pair_count as u32;
                }
            },
            |context, hub| {
                let mut resource = Resource::new();
                let mut epilogue = BlockEpilogueDequant::<EOut>::new(
                    &mut resource,
                    MatrixCoord::new(self.l1_tile.m, self.l1_tile.n),
                );

                let core_loops = self.scheduler.core_loops();
                let mut task = context.pair_index as u32;
                let mut ordinal = 0;
                while task < core_loops {
                    let block = self.scheduler.block_coord(task);
                    let actual = self.scheduler.actual_block_shape(block);
                    let block_origin =
                        MatrixCoord::new(block.m * self.l1_tile.m, block.n * self.l1_tile.n);

                    let params = DequantParams {
                        scale: self.scale.at(block_origin.column as i64),
                        per_token_scale: self.per_token_scale.at(block_origin.row as i64),
                        bias: if self.bias.is_absent() {
                            self.bias
                        } else {
                            self.bias.at(block_origin.column as i64)
                        },
                    };

                    hub.wait_flag_with_reverse(context.pair_index, FLAG_AIC_STORE, ordinal);
                    epilogue.run(
                        context.subcore_index,
                        self.workspace.at(layout_workspace.offset(block_origin)),
                        &layout_workspace,
                        &params,
                        self.d.at(self.layout_d.offset(block_origin)),
                        &self.layout_d,
                        actual.mn(),
                    );
                    ordinal += 1;
                    task += context.pair_count as u32;
                }
            },
        );
    }
}
