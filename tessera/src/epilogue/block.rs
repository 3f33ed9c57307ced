use super::tile::{
    TileColumnBroadcastMul, TileElemWiseCast, TileRowBroadcastAdd, TileRowBroadcastMul,
};
use crate::{
    arch::{AIV_PER_AIC, Resource, TileBuffer},
    coord::MatrixCoord,
    data_type::Element,
    device::GlobalTensor,
    layout::RowMajor,
};

/// How the two vector cores of a pair split one output block: each takes
/// half of the rows.
fn subcore_rows(actual_m: u32, half_m: u32, subcore: usize) -> (u32, u32) {
    let first = actual_m.min(half_m);
    let second = actual_m - first;
    let start = subcore as u32 * half_m;
    let rows = if subcore == 0 { first } else { second };
    (start, rows)
}

/// Vector-core epilogue for the accumulate-into-C pipeline:
/// `D = alpha * X + beta * C` over one output block, where X is the
/// matrix-core result staged in the workspace. Each vector core of the
/// pair handles half the block rows.
pub struct BlockEpilogueGemm<E: Element> {
    block_shape: MatrixCoord,
    ub_x: TileBuffer<E>,
    ub_c: TileBuffer<E>,
    ub_d: TileBuffer<E>,
}

impl<E: Element> BlockEpilogueGemm<E> {
    pub fn new(resource: &mut Resource, block_shape: MatrixCoord) -> Self {
        let half = (block_shape.row as usize).div_ceil(AIV_PER_AIC) * block_shape.column as usize;
        Self {
            block_shape,
            ub_x: resource.ub.alloc(half),
            ub_c: resource.ub.alloc(half),
            ub_d: resource.ub.alloc(half),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        subcore: usize,
        gm_x: GlobalTensor<E>,
        layout_x: &RowMajor,
        gm_c: GlobalTensor<E>,
        layout_c: &RowMajor,
        gm_d: GlobalTensor<E>,
        layout_d: &RowMajor,
        actual: MatrixCoord,
        alpha: f32,
        beta: f32,
    ) {
        let half_m = self.block_shape.row.div_ceil(AIV_PER_AIC as u32);
        let (row_start, rows) = subcore_rows(actual.row, half_m, subcore);
        if rows == 0 {
            return;
        }
        let columns = actual.column;

        let ub_x = self.ub_x.as_mut_slice();
        let ub_c = self.ub_c.as_mut_slice();
        let ub_d = self.ub_d.as_mut_slice();
        for row in 0..rows {
            for column in 0..columns {
                let coord = MatrixCoord::new(row_start + row, column);
                let index = (row * columns + column) as usize;
                ub_x[index] = gm_x.read(layout_x.offset(coord));
                ub_c[index] = gm_c.read(layout_c.offset(coord));
            }
        }

        let count = (rows * columns) as usize;
        for index in 0..count {
            let x: f32 = num_traits::cast(ub_x[index]).unwrap_or(0.0);
            let c: f32 = num_traits::cast(ub_c[index]).unwrap_or(0.0);
            ub_d[index] = num_traits::cast(alpha * x + beta * c).unwrap_or_else(E::zeroed);
        }

        for row in 0..rows {
            for column in 0..columns {
                let coord = MatrixCoord::new(row_start + row, column);
                gm_d.write(layout_d.offset(coord), ub_d[(row * columns + column) as usize]);
            }
        }
    }
}

/// Global-memory operands of the dequantizing epilogue. All vectors are
/// f32; `bias` may be absent.
#[derive(Clone, Copy)]
pub struct DequantParams {
    /// Per-column quantization scale, length N.
    pub scale: GlobalTensor<f32>,
    /// Per-row activation scale, length M.
    pub per_token_scale: GlobalTensor<f32>,
    /// Per-column bias, length N.
    pub bias: GlobalTensor<f32>,
}

/// Vector-core epilogue of the quantized pipeline: widens the i32
/// workspace block, applies the per-column and per-row scales plus the
/// optional bias, and narrows into the output element type.
pub struct BlockEpilogueDequant<E: Element> {
    block_shape: MatrixCoord,
    ub_x: TileBuffer<i32>,
    ub_temp: TileBuffer<f32>,
    ub_c: TileBuffer<E>,
    ub_scale: TileBuffer<f32>,
    ub_per_token: TileBuffer<f32>,
    ub_bias: TileBuffer<f32>,
    cast: TileElemWiseCast,
    row_mul: TileRowBroadcastMul,
    column_mul: TileColumnBroadcastMul,
    row_add: TileRowBroadcastAdd,
}

impl<E: Element> BlockEpilogueDequant<E> {
    pub fn new(resource: &mut Resource, block_shape: MatrixCoord) -> Self {
        let half = (block_shape.row as usize).div_ceil(AIV_PER_AIC) * block_shape.column as usize;
        Self {
            block_shape,
            ub_x: resource.ub.alloc(half),
            ub_temp: resource.ub.alloc(half),
            ub_c: resource.ub.alloc(half),
            ub_scale: resource.ub.alloc(block_shape.column as usize),
            ub_per_token: resource
                .ub
                .alloc((block_shape.row as usize).div_ceil(AIV_PER_AIC)),
            ub_bias: resource.ub.alloc(block_shape.column as usize),
            cast: TileElemWiseCast,
            row_mul: TileRowBroadcastMul,
            column_mul: TileColumnBroadcastMul,
            row_add: TileRowBroadcastAdd,
        }
    }

    /// `gm_x` and `params` views start at this block's origin row/column
    /// of the problem (the caller applies group and block offsets).
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        subcore: usize,
        gm_x: GlobalTensor<i32>,
        layout_x: &RowMajor,
        params: &DequantParams,
        gm_c: GlobalTensor<E>,
        layout_c: &RowMajor,
        actual: MatrixCoord,
    ) {
        let half_m = self.block_shape.row.div_ceil(AIV_PER_AIC as u32);
        let (row_start, rows) = subcore_rows(actual.row, half_m, subcore);
        if rows == 0 {
            return;
        }
        let columns = actual.column;

        let ub_x = self.ub_x.as_mut_slice();
        for row in 0..rows {
            for column in 0..columns {
                let coord = MatrixCoord::new(row_start + row, column);
                ub_x[(row * columns + column) as usize] = gm_x.read(layout_x.offset(coord));
            }
        }
        let ub_scale = self.ub_scale.as_mut_slice();
        for column in 0..columns {
            ub_scale[column as usize] = params.scale.read(column as i64);
        }
        let ub_per_token = self.ub_per_token.as_mut_slice();
        for row in 0..rows {
            ub_per_token[row as usize] = params.per_token_scale.read((row_start + row) as i64);
        }
        let has_bias = !params.bias.is_absent();
        if has_bias {
            let ub_bias = self.ub_bias.as_mut_slice();
            for column in 0..columns {
                ub_bias[column as usize] = params.bias.read(column as i64);
            }
        }

        let count = (rows * columns) as usize;
        let temp = self.ub_temp.as_mut_slice();
        self.cast.widen(temp, ub_x, count);
        self.row_mul
            .run(temp, ub_scale, rows as usize, columns as usize);
        self.column_mul
            .run(temp, ub_per_token, rows as usize, columns as usize);
        if has_bias {
            self.row_add
                .run(temp, self.ub_bias.as_slice(), rows as usize, columns as usize);
        }
        self.cast.narrow(self.ub_c.as_mut_slice(), temp, count);

        let ub_c = self.ub_c.as_slice();
        for row in 0..rows {
            for column in 0..columns {
                let coord = MatrixCoord::new(row_start + row, column);
                gm_c.write(layout_c.offset(coord), ub_c[(row * columns + column) as usize]);
            }
        }
    }
}
