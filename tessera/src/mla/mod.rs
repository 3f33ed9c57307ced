use std::marker::PhantomData;

use crate::{
    arch::{CrossCoreFlag, Resource, TileBuffer},
    coord::{GemmCoord, MatrixCoord, ceil_div},
    data_type::Element,
    device::{GlobalTensor, launch},
    error::KernelError,
    gemm::block::BlockMmad,
    layout::{ColumnMajor, RowMajor},
};

/// Latent projection rank of the shared KV cache.
pub const LATENT_RANK: u32 = 512;
/// Rank of the rotary-embedded key tail.
pub const ROPE_RANK: u32 = 64;
/// Per-head query width: latent part and rope tail, stored concatenated.
pub const QK_RANK: u32 = LATENT_RANK + ROPE_RANK;

/// Most heads one decode launch supports; one block row covers them all,
/// so the score matrix of a batch is a single block-row strip.
pub const MAX_HEADS: u32 = 128;

/// "Scores of this batch are durably stored" — matrix core to both vector
/// cores of the pair.
const FLAG_SCORES: CrossCoreFlag = CrossCoreFlag::new(0, 1, 2);
/// "My half of the probability rows is normalized" — one flag per vector
/// core back to the matrix core.
const FLAG_PROBS: [CrossCoreFlag; 2] =
    [CrossCoreFlag::new(2, 3, 1), CrossCoreFlag::new(4, 5, 1)];
/// "The output accumulator of this batch is durably stored" — matrix core
/// to both vector cores for the final cast.
const FLAG_OUT: CrossCoreFlag = CrossCoreFlag::new(6, 7, 2);

/// Block tiles of the two matmuls. Both live in one core's tiers at once,
/// so the L0 depths are sized for the widest operand type: at f32 each
/// matmul takes exactly half of L0A/L0B and half of L0C.
const S_L1_TILE: GemmCoord = GemmCoord::new(MAX_HEADS, 128, 128);
const S_L0_TILE: GemmCoord = GemmCoord::new(MAX_HEADS, 128, 32);
const O_L1_TILE: GemmCoord = GemmCoord::new(MAX_HEADS, 128, 64);
const O_L0_TILE: GemmCoord = GemmCoord::new(MAX_HEADS, 128, 32);

/// Softmax row chunk staged per UB pass.
const ROW_CHUNK: usize = 8192;

/// Fused multi-head latent attention, decode form. Per batch `b` with
/// `len = kv_lengths[b]` cached positions:
///
///   S = Q · KVᵀ            (heads × len, latent and rope folded into K)
///   P = softmax(scale · S)  row-wise over the cached positions
///   O = P · C               (heads × LATENT_RANK, C = latent cache part)
///
/// The matrix core computes both matmuls; its two vector cores split the
/// softmax rows and the final narrowing cast. The matrix unit consumes
/// same-typed operands, so the vector cores narrow the normalized rows
/// into an `E`-typed probability workspace before the second matmul.
/// Three stages per batch, sequenced by two forward flags and one
/// backward flag per vector core.
pub struct FusedMla<E: Element<Accumulator = f32>> {
    /// Queries, `[batch, heads, QK_RANK]`.
    pub q: GlobalTensor<E>,
    /// KV cache, `[batch, max_kv_len, QK_RANK]`; columns `0..LATENT_RANK`
    /// are the latent projection, the tail is the rope key.
    pub kv: GlobalTensor<E>,
    /// Cached positions per batch, `[batch]`.
    pub kv_lengths: GlobalTensor<i32>,
    /// Output, `[batch, heads, LATENT_RANK]`.
    pub out: GlobalTensor<E>,
    /// Raw score workspace, `[batch, heads, max_kv_len]` f32.
    pub scores: GlobalTensor<f32>,
    /// Normalized probability workspace, `[batch, heads, max_kv_len]`,
    /// already narrowed to the operand type of the second matmul.
    pub probs: GlobalTensor<E>,
    /// Output accumulator workspace, `[batch, heads, LATENT_RANK]` f32.
    pub out_acc: GlobalTensor<f32>,
    pub batch: u32,
    pub heads: u32,
    pub max_kv_len: u32,
    pub scale: f32,
}

/// Rows one vector core of the pair owns.
fn subcore_rows(heads: u32, subcore: usize) -> (u32, u32) {
    let half = ceil_div(heads, 2);
    if subcore == 0 {
        (0, half.min(heads))
    } else {
        (half, heads - half.min(heads))
    }
}

struct MlaSoftmax {
    ub_row: TileBuffer<f32>,
}

impl MlaSoftmax {
    fn new(resource: &mut Resource) -> Self {
        Self {
            ub_row: resource.ub.alloc(ROW_CHUNK),
        }
    }

    /// Normalizes one scaled score row in three chunked passes (max,
    /// exp-and-sum, divide), narrowing the normalized probabilities into
    /// the matmul operand workspace on the final pass.
    fn run_row<E: Element>(
        &mut self,
        scores: GlobalTensor<f32>,
        probs: GlobalTensor<E>,
        base: i64,
        len: u32,
        scale: f32,
    ) {
        let ub = self.ub_row.as_mut_slice();
        let len = len as usize;

        let mut max = f32::NEG_INFINITY;
        let mut column = 0usize;
        while column < len {
            let chunk = ROW_CHUNK.min(len - column);
            for index in 0..chunk {
                ub[index] = scores.read(base + (column + index) as i64) * scale;
            }
            for &value in &ub[..chunk] {
                max = max.max(value);
            }
            column += chunk;
        }

        let mut sum = 0.0f32;
        column = 0;
        while column < len {
            let chunk = ROW_CHUNK.min(len - column);
            for index in 0..chunk {
                ub[index] = (scores.read(base + (column + index) as i64) * scale - max).exp();
                sum += ub[index];
            }
            for index in 0..chunk {
                scores.write(base + (column + index) as i64, ub[index]);
            }
            column += chunk;
        }

        let inverse = 1.0 / sum;
        column = 0;
        while column < len {
            let chunk = ROW_CHUNK.min(len - column);
            for index in 0..chunk {
                let offset = base + (column + index) as i64;
                let value = scores.read(offset) * inverse;
                probs.write(offset, num_traits::cast(value).unwrap_or_else(E::zeroed));
            }
            column += chunk;
        }
    }
}

impl<E: Element<Accumulator = f32>> FusedMla<E> {
    pub fn run(&self, pair_count: usize) {
        launch(
            pair_count,
            |context, hub| {
                let mut resource = Resource::new();
                let mut score_mmad = BlockMmad::<E, f32, RowMajor, ColumnMajor>::new(
                    &mut resource,
                    S_L1_TILE,
                    S_L0_TILE,
                );
                let mut out_mmad = BlockMmad::<E, f32, RowMajor, RowMajor>::new(
                    &mut resource,
                    O_L1_TILE,
                    O_L0_TILE,
                );

                let mut batch = context.pair_index as u32;
                let mut ordinal = 0u32;
                while batch < self.batch {
                    let len = self.kv_lengths.read(batch as i64) as u32;
                    let q_base = batch as i64 * self.heads as i64 * QK_RANK as i64;
                    let kv_base = batch as i64 * self.max_kv_len as i64 * QK_RANK as i64;
                    let s_base = batch as i64 * self.heads as i64 * self.max_kv_len as i64;
                    let o_base = batch as i64 * self.heads as i64 * LATENT_RANK as i64;

                    // Stage 1: S = Q · KVᵀ, one block row, len-tiled columns.
                    let layout_q = RowMajor::new(self.heads, QK_RANK);
                    let layout_kt =
                        ColumnMajor::with_stride(QK_RANK, len, QK_RANK as i64);
                    let layout_s =
                        RowMajor::with_stride(self.heads, len, self.max_kv_len as i64);
                    for block in 0..ceil_div(len, S_L1_TILE.n) {
                        let n_actual = S_L1_TILE.n.min(len - block * S_L1_TILE.n);
                        let column = block * S_L1_TILE.n;
                        score_mmad.run(
                            self.q.at(q_base),
                            &layout_q,
                            self.kv
                                .at(kv_base + layout_kt.offset(MatrixCoord::new(0, column))),
                            &layout_kt,
                            self.scores
                                .at(s_base + layout_s.offset(MatrixCoord::new(0, column))),
                            &layout_s,
                            GemmCoord::new(self.heads, n_actual, QK_RANK),
                        );
                    }
                    hub.set_flag_with_reverse(context.pair_index, FLAG_SCORES);

                    // Stage 3 needs both halves of the softmax.
                    hub.wait_flag_with_reverse(context.pair_index, FLAG_PROBS[0], ordinal);
                    hub.wait_flag_with_reverse(context.pair_index, FLAG_PROBS[1], ordinal);

                    // Stage 3: O = P · C over the latent cache columns.
                    let layout_p =
                        RowMajor::with_stride(self.heads, len, self.max_kv_len as i64);
                    let layout_latent =
                        RowMajor::with_stride(len, LATENT_RANK, QK_RANK as i64);
                    let layout_o = RowMajor::new(self.heads, LATENT_RANK);
                    for block in 0..ceil_div(LATENT_RANK, O_L1_TILE.n) {
                        let column = block * O_L1_TILE.n;
                        let n_actual = O_L1_TILE.n.min(LATENT_RANK - column);
                        out_mmad.run(
                            self.probs.at(s_base),
                            &layout_p,
                            self.kv.at(
                                kv_base + layout_latent.offset(MatrixCoord::new(0, column)),
                            ),
                            &layout_latent,
                            self.out_acc
                                .at(o_base + layout_o.offset(MatrixCoord::new(0, column))),
                            &layout_o,
                            GemmCoord::new(self.heads, n_actual, len),
                        );
                    }
                    hub.set_flag_with_reverse(context.pair_index, FLAG_OUT);

                    ordinal += 1;
                    batch += context.pair_count as u32;
                }
            },
            |context, hub| {
                let mut resource = Resource::new();
                let mut softmax = MlaSoftmax::new(&mut resource);
                let (row_start, rows) = subcore_rows(self.heads, context.subcore_index);

                let mut batch = context.pair_index as u32;
                let mut ordinal = 0u32;
                while batch < self.batch {
                    let len = self.kv_lengths.read(batch as i64) as u32;
                    let s_base = batch as i64 * self.heads as i64 * self.max_kv_len as i64;
                    let o_base = batch as i64 * self.heads as i64 * LATENT_RANK as i64;

                    // Stage 2: row-wise softmax over this core's rows.
                    hub.wait_flag_with_reverse(context.pair_index, FLAG_SCORES, ordinal);
                    for row in row_start..row_start + rows {
                        let base = s_base + row as i64 * self.max_kv_len as i64;
                        softmax.run_row(self.scores, self.probs, base, len, self.scale);
                    }
                    hub.set_flag_with_reverse(
                        context.pair_index,
                        FLAG_PROBS[context.subcore_index],
                    );

                    // Final narrowing cast of the output accumulator.
                    hub.wait_flag_with_reverse(context.pair_index, FLAG_OUT, ordinal);
                    for row in row_start..row_start + rows {
                        let base = o_base + row as i64 * LATENT_RANK as i64;
                        for column in 0..LATENT_RANK as i64 {
                            let value = self.out_acc.read(base + column);
                            self.out.write(
                                base + column,
                                num_traits::cast(value).unwrap_or_else(E::zeroed),
                            );
                        }
                    }

                    ordinal += 1;
                    batch += context.pair_count as u32;
                }
            },
        );
    }
}

/// Host-side handle of the fused decode-attention pipeline.
pub struct MlaOperation<E: Element<Accumulator = f32>> {
    _marker: PhantomData<E>,
}

impl<E: Element<Accumulator = f32>> MlaOperation<E> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn can_implement(
        &self,
        batch: u32,
        heads: u32,
        max_kv_len: u32,
        kv_lengths: &[i32],
    ) -> Result<(), KernelError> {
        if batch == 0 || heads == 0 || max_kv_len == 0 {
            return Err(KernelError::UnsupportedConfiguration(
                "batch, heads and the cache capacity must be non-zero".to_string(),
            ));
        }
        if heads > MAX_HEADS {
            return Err(KernelError::UnsupportedConfiguration(format!(
                "{heads} heads exceed the single-block-row limit of {MAX_HEADS}",
            )));
        }
        if kv_lengths.len() < batch as usize {
            return Err(KernelError::Launch(
                "kv length vector shorter than the batch".to_string(),
            ));
        }
        for (index, &len) in kv_lengths.iter().take(batch as usize).enumerate() {
            if len <= 0 || len as u32 > max_kv_len {
                return Err(KernelError::UnsupportedConfiguration(format!(
                    "kv length {len} of batch {index} outside 1..={max_kv_len}",
                )));
            }
        }
        Ok(())
    }

    /// Raw scores, narrowed probabilities and the f32 output accumulator.
    pub fn workspace_size(&self, batch: u32, heads: u32, max_kv_len: u32) -> usize {
        let rows = batch as usize * heads as usize;
        let scores = rows * max_kv_len as usize * std::mem::size_of::<f32>();
        let probs = rows * max_kv_len as usize * E::DATA_TYPE.size_in_bytes();
        let out_acc = rows * LATENT_RANK as usize * std::mem::size_of::<f32>();
        scores + probs + out_acc
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        pair_count: usize,
        batch: u32,
        heads: u32,
        max_kv_len: u32,
        scale: f32,
        q: GlobalTensor<E>,
        kv: GlobalTensor<E>,
        kv_lengths: GlobalTensor<i32>,
        kv_lengths_host: &[i32],
        out: GlobalTensor<E>,
        scores: GlobalTensor<f32>,
        probs: GlobalTensor<E>,
        out_acc: GlobalTensor<f32>,
    ) -> Result<(), KernelError> {
        self.can_implement(batch, heads, max_kv_len, kv_lengths_host)?;
        let q_len = batch as usize * heads as usize * QK_RANK as usize;
        let kv_len = batch as usize * max_kv_len as usize * QK_RANK as usize;
        let out_len = batch as usize * heads as usize * LATENT_RANK as usize;
        if q.len() < q_len || kv.len() < kv_len || out.len() < out_len {
            return Err(KernelError::Launch(
                "attention tensors shorter than the problem requires".to_string(),
            ));
        }
        let scores_len = batch as usize * heads as usize * max_kv_len as usize;
        let provided = (scores.len() + out_acc.len()) * std::mem::size_of::<f32>()
            + probs.len() * E::DATA_TYPE.size_in_bytes();
        let required = self.workspace_size(batch, heads, max_kv_len);
        if scores.len() < scores_len
            || probs.len() < scores_len
            || out_acc.len() < out_len
            || provided < required
        {
            return Err(KernelError::Workspace { required, provided });
        }

        FusedMla {
            q,
            kv,
            kv_lengths,
            out,
            scores,
            probs,
            out_acc,
            batch,
            heads,
            max_kv_len,
            scale,
        }
        .run(pair_count);
        Ok(())
    }
}

impl<E: Element<Accumulator = f32>> Default for MlaOperation<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;

    #[test]
    fn subcore_split_covers_all_rows() {
        for heads in [1u32, 2, 3, 64, 127, 128] {
            let (start0, rows0) = subcore_rows(heads, 0);
            let (start1, rows1) = subcore_rows(heads, 1);
            assert_eq!(start0, 0);
            assert_eq!(start1, rows0);
            assert_eq!(rows0 + rows1, heads);
        }
    }

    #[test]
    fn both_pipeline_mmads_share_one_core_budget() {
        // The widest supported operand type; the two matmuls together may
        // not overflow any tier of the shared per-core resource.
        let mut resource = Resource::new();
        let _score_mmad = BlockMmad::<f32, f32, RowMajor, ColumnMajor>::new(
            &mut resource,
            S_L1_TILE,
            S_L0_TILE,
        );
        let _out_mmad =
            BlockMmad::<f32, f32, RowMajor, RowMajor>::new(&mut resource, O_L1_TILE, O_L0_TILE);
    }

    #[test]
    fn head_count_and_lengths_are_validated() {
        let operation = MlaOperation::<f16>::new();
        assert!(operation.can_implement(2, 128, 1024, &[512, 1024]).is_ok());
        assert!(operation.can_implement(2, 129, 1024, &[512, 1024]).is_err());
        assert!(operation.can_implement(2, 128, 1024, &[512, 1025]).is_err());
        assert!(operation.can_implement(2, 128, 1024, &[0, 16]).is_err());
        assert!(operation.can_implement(2, 128, 1024, &[16]).is_err());
    }
}
