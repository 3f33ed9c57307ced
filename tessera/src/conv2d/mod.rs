use std::marker::PhantomData;

use crate::{
    arch::{C0_NUM_PER_FRACTAL, Resource, TileBuffer},
    coord::{GemmCoord, MatrixCoord, ceil_div, round_up},
    data_type::{Accumulator, Element},
    device::{GlobalTensor, launch_aic_only},
    error::KernelError,
    gemm::{
        block::{BlockScheduler, IdentityBlockScheduler, SwizzleDirection},
        tile::{CopyGmToL1, CopyL1ToL0A, CopyL1ToL0B, TileMmad},
    },
    layout::{FractalLayout, RowMajor},
};

/// NHWC convolution problem. The implicit-GEMM view maps output pixels to
/// block rows and output channels to block columns:
/// `M = batch * out_h * out_w`, `N = out_channels`,
/// `K = kernel_h * kernel_w * in_channels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dProblem {
    pub batch: u32,
    pub in_height: u32,
    pub in_width: u32,
    pub in_channels: u32,
    pub out_channels: u32,
    pub kernel_h: u32,
    pub kernel_w: u32,
    pub stride_h: u32,
    pub stride_w: u32,
    pub pad_h: u32,
    pub pad_w: u32,
}

impl Conv2dProblem {
    pub fn out_height(&self) -> u32 {
        (self.in_height + 2 * self.pad_h - self.kernel_h) / self.stride_h + 1
    }

    pub fn out_width(&self) -> u32 {
        (self.in_width + 2 * self.pad_w - self.kernel_w) / self.stride_w + 1
    }

    pub fn gemm_extent(&self) -> GemmCoord {
        GemmCoord::new(
            self.batch * self.out_height() * self.out_width(),
            self.out_channels,
            self.kernel_h * self.kernel_w * self.in_channels,
        )
    }
}

/// Stages the im2col window of one block into the zN L1 arrangement. Rows
/// are output pixels, columns walk (kernel_h, kernel_w, in_channels);
/// out-of-image taps read as zero, which is what the padded convolution
/// needs and what the zero-fill of the staging pass already provides.
struct CopyIm2colToL1<E: Element> {
    _marker: PhantomData<E>,
}

impl<E: Element> CopyIm2colToL1<E> {
    fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn copy(
        &self,
        dst: &mut [E],
        layout_dst: &FractalLayout,
        input: GlobalTensor<E>,
        problem: &Conv2dProblem,
        row_origin: u32,
        column_origin: u32,
        rows: u32,
        columns: u32,
    ) {
        dst[..layout_dst.capacity()].fill(E::zeroed());
        let out_plane = problem.out_height() * problem.out_width();
        for row in 0..rows {
            let pixel = row_origin + row;
            let image = pixel / out_plane;
            let rem = pixel % out_plane;
            let out_y = rem / problem.out_width();
            let out_x = rem % problem.out_width();
            for column in 0..columns {
                let tap = column_origin + column;
                let tap_y = tap / (problem.kernel_w * problem.in_channels);
                let tap_rem = tap % (problem.kernel_w * problem.in_channels);
                let tap_x = tap_rem / problem.in_channels;
                let channel = tap_rem % problem.in_channels;

                let in_y = (out_y * problem.stride_h + tap_y) as i64 - problem.pad_h as i64;
                let in_x = (out_x * problem.stride_w + tap_x) as i64 - problem.pad_w as i64;
                if in_y < 0
                    || in_y >= problem.in_height as i64
                    || in_x < 0
                    || in_x >= problem.in_width as i64
                {
                    continue;
                }
                let source = ((image as i64 * problem.in_height as i64 + in_y)
                    * problem.in_width as i64
                    + in_x)
                    * problem.in_channels as i64
                    + channel as i64;
                dst[layout_dst.offset(MatrixCoord::new(row, column)) as usize] =
                    input.read(source);
            }
        }
    }
}

/// Computes one output block of the implicit GEMM: gathers the im2col
/// window into L1, stages the weight panel the same way a dense B operand
/// is staged, accumulates over the K taps in L0C, and drains with the
/// optional per-channel bias folded in before the narrowing store.
struct BlockConv2d<E: Element> {
    l1_tile: GemmCoord,
    l0_tile: GemmCoord,
    l1a: TileBuffer<E>,
    l1b: TileBuffer<E>,
    l0a: TileBuffer<E>,
    l0b: TileBuffer<E>,
    l0c: TileBuffer<E::Accumulator>,
    copy_im2col: CopyIm2colToL1<E>,
    copy_gm_to_l1b: CopyGmToL1<E, RowMajor>,
    copy_l1_to_l0a: CopyL1ToL0A<E>,
    copy_l1_to_l0b: CopyL1ToL0B<E>,
    tile_mmad: TileMmad<E>,
}

impl<E: Element> BlockConv2d<E> {
    fn new(resource: &mut Resource, l1_tile: GemmCoord, l0_tile: GemmCoord) -> Self {
        let l1a_len = FractalLayout::zn::<E>(l1_tile.m, l1_tile.k).capacity();
        let l1b_len = FractalLayout::zn::<E>(l1_tile.k, l1_tile.n).capacity();
        let l0a_len = FractalLayout::zz::<E>(l1_tile.m, l0_tile.k).capacity();
        let l0b_len = FractalLayout::nz::<E>(l0_tile.k, l1_tile.n).capacity();
        let l0c_len = FractalLayout::zn_l0c(MatrixCoord::new(
            round_up(l1_tile.m, C0_NUM_PER_FRACTAL),
            round_up(l1_tile.n, C0_NUM_PER_FRACTAL),
        ))
        .capacity();
        Self {
            l1_tile,
            l0_tile,
            l1a: resource.l1.alloc(l1a_len),
            l1b: resource.l1.alloc(l1b_len),
            l0a: resource.l0a.alloc(l0a_len),
            l0b: resource.l0b.alloc(l0b_len),
            l0c: resource.l0c.alloc(l0c_len),
            copy_im2col: CopyIm2colToL1::new(),
            copy_gm_to_l1b: CopyGmToL1::new(),
            copy_l1_to_l0a: CopyL1ToL0A::new(),
            copy_l1_to_l0b: CopyL1ToL0B::new(),
            tile_mmad: TileMmad::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        &mut self,
        input: GlobalTensor<E>,
        weight: GlobalTensor<E>,
        layout_weight: &RowMajor,
        bias: GlobalTensor<f32>,
        out: GlobalTensor<E>,
        layout_out: &RowMajor,
        problem: &Conv2dProblem,
        block_origin: MatrixCoord,
        actual: GemmCoord,
    ) {
        let m_round = round_up(actual.m, C0_NUM_PER_FRACTAL);
        let n_round = round_up(actual.n, C0_NUM_PER_FRACTAL);
        let layout_c_l0 = FractalLayout::zn_l0c(MatrixCoord::new(m_round, n_round));
        let layout_a_l1 = FractalLayout::zn::<E>(self.l1_tile.m, self.l1_tile.k);
        let layout_b_l1 = FractalLayout::zn::<E>(self.l1_tile.k, self.l1_tile.n);

        let k_slices = ceil_div(actual.k, self.l1_tile.k);
        let m_parts = ceil_div(m_round, self.l0_tile.m);
        let n_parts = ceil_div(n_round, self.l0_tile.n);

        for k_slice in 0..k_slices {
            let k_actual = self.l1_tile.k.min(actual.k - k_slice * self.l1_tile.k);

            self.copy_im2col.copy(
                self.l1a.as_mut_slice(),
                &layout_a_l1,
                input,
                problem,
                block_origin.row,
                k_slice * self.l1_tile.k,
                actual.m,
                k_actual,
            );
            let weight_origin = MatrixCoord::new(k_slice * self.l1_tile.k, 0);
            let layout_weight_tile = layout_weight.tile(MatrixCoord::new(k_actual, actual.n));
            self.copy_gm_to_l1b.copy(
                self.l1b.as_mut_slice(),
                &layout_b_l1,
                weight.at(layout_weight.offset(weight_origin)),
                &layout_weight_tile,
            );

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

                    let layout_a_l0 = FractalLayout::zz::<E>(m_part_actual, k_part_actual);
                    let a_origin =
                        MatrixCoord::new(m_part * self.l0_tile.m, k_part * self.l0_tile.k);
                    let a_base = layout_a_l1.offset(a_origin) as usize;
                    let layout_a_view =
                        layout_a_l1.tile(MatrixCoord::new(m_part_actual, k_part_actual));
                    self.copy_l1_to_l0a.copy(
                        self.l0a.as_mut_slice(),
                        &layout_a_l0,
                        &self.l1a.as_slice()[a_base..],
                        &layout_a_view,
                    );

                    for n_part in 0..n_parts {
                        let n_part_actual = if n_part + 1 < n_parts {
                            self.l0_tile.n
                        } else {
                            n_round - n_part * self.l0_tile.n
                        };

                        let layout_b_l0 = FractalLayout::nz::<E>(k_part_actual, n_part_actual);
                        let b_origin =
                            MatrixCoord::new(k_part * self.l0_tile.k, n_part * self.l0_tile.n);
                        let b_base = layout_b_l1.offset(b_origin) as usize;
                        let layout_b_view =
                            layout_b_l1.tile(MatrixCoord::new(k_part_actual, n_part_actual));
                        self.copy_l1_to_l0b.copy(
                            self.l0b.as_mut_slice(),
                            &layout_b_l0,
                            &self.l1b.as_slice()[b_base..],
                            &layout_b_view,
                        );

                        let c_origin =
                            MatrixCoord::new(m_part * self.l0_tile.m, n_part * self.l0_tile.n);
                        let c_base = layout_c_l0.offset(c_origin) as usize;
                        let layout_c_view =
                            layout_c_l0.tile(MatrixCoord::new(m_part_actual, n_part_actual));
                        let init_c = k_slice == 0 && k_part == 0;
                        self.tile_mmad.mmad(
                            &mut self.l0c.as_mut_slice()[c_base..],
                            &layout_c_view,
                            self.l0a.as_slice(),
                            &layout_a_l0,
                            self.l0b.as_slice(),
                            &layout_b_l0,
                            GemmCoord::new(m_part_actual, n_part_actual, k_part_actual),
                            init_c,
                        );
                    }
                }
            }
        }

        // Drain with the per-channel bias folded in before narrowing.
        let l0c = self.l0c.as_slice();
        let has_bias = !bias.is_absent();
        for row in 0..actual.m {
            for column in 0..actual.n {
                let mut value = l0c[layout_c_l0.offset(MatrixCoord::new(row, column)) as usize]
                    .to_f32();
                if has_bias {
                    value += bias.read((block_origin.column + column) as i64);
                }
                let coord = MatrixCoord::new(block_origin.row + row, block_origin.column + column);
                out.write(
                    layout_out.offset(coord),
                    num_traits::cast(value).unwrap_or_else(E::zeroed),
                );
            }
        }
    }
}

/// Implicit-GEMM convolution kernel, matrix cores only: the block walk is
/// the dense serpentine scheduler over the (output pixels × output
/// channels) grid; only the A-operand staging differs from the dense path.
pub struct BasicConv2d<E: Element> {
    pub problem: Conv2dProblem,
    pub input: GlobalTensor<E>,
    pub weight: GlobalTensor<E>,
    pub bias: GlobalTensor<f32>,
    pub out: GlobalTensor<E>,
    pub l1_tile: GemmCoord,
    pub l0_tile: GemmCoord,
    pub swizzle_offset: u32,
}

impl<E: Element> BasicConv2d<E> {
    pub fn run(&self, core_count: usize) {
        let extent = self.problem.gemm_extent();
        let layout_weight = RowMajor::new(extent.k, extent.n);
        let layout_out = RowMajor::new(extent.m, extent.n);
        let scheduler = IdentityBlockScheduler::new(
            extent,
            MatrixCoord::new(self.l1_tile.m, self.l1_tile.n),
            self.swizzle_offset,
            SwizzleDirection::Zn,
        );
        launch_aic_only(core_count, |context, _hub| {
            let mut resource = Resource::new();
            let mut block = BlockConv2d::<E>::new(&mut resource, self.l1_tile, self.l0_tile);

            let core_loops = scheduler.core_loops();
            let mut task = context.pair_index as u32;
            while task < core_loops {
                let coord = scheduler.block_coord(task);
                let actual = scheduler.actual_block_shape(coord);
                let block_origin =
                    MatrixCoord::new(coord.m * self.l1_tile.m, coord.n * self.l1_tile.n);
                block.run(
                    self.input,
                    self.weight,
                    &layout_weight,
                    self.bias,
                    self.out,
                    &layout_out,
                    &self.problem,
                    block_origin,
                    actual,
                );
                task += context.pair_count as u32;
            }
        });
    }
}

/// Host-side handle of the convolution pipeline.
pub struct Conv2dOperation<E: Element> {
    pub l1_tile: GemmCoord,
    pub l0_tile: GemmCoord,
    pub swizzle_offset: u32,
    _marker: PhantomData<E>,
}

impl<E: Element> Conv2dOperation<E> {
    pub fn new() -> Self {
        Self {
            l1_tile: GemmCoord::new(128, 128, 128),
            l0_tile: GemmCoord::new(128, 128, 64),
            swizzle_offset: 1,
            _marker: PhantomData,
        }
    }

    pub fn can_implement(&self, problem: &Conv2dProblem) -> Result<(), KernelError> {
        if problem.batch == 0
            || problem.in_channels == 0
            || problem.out_channels == 0
            || problem.kernel_h == 0
            || problem.kernel_w == 0
        {
            return Err(KernelError::UnsupportedConfiguration(
                "every convolution extent must be non-zero".to_string(),
            ));
        }
        if problem.stride_h == 0 || problem.stride_w == 0 {
            return Err(KernelError::UnsupportedConfiguration(
                "strides must be non-zero".to_string(),
            ));
        }
        if problem.in_height + 2 * problem.pad_h < problem.kernel_h
            || problem.in_width + 2 * problem.pad_w < problem.kernel_w
        {
            return Err(KernelError::UnsupportedConfiguration(
                "kernel window larger than the padded image".to_string(),
            ));
        }
        Ok(())
    }

    pub fn workspace_size(&self, _problem: &Conv2dProblem) -> usize {
        0
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        core_count: usize,
        problem: Conv2dProblem,
        input: GlobalTensor<E>,
        weight: GlobalTensor<E>,
        bias: GlobalTensor<f32>,
        out: GlobalTensor<E>,
    ) -> Result<(), KernelError> {
        self.can_implement(&problem)?;
        let extent = problem.gemm_extent();
        let need_input = (problem.batch * problem.in_height * problem.in_width
            * problem.in_channels) as usize;
        if input.len() < need_input
            || weight.len() < extent.k as usize * extent.n as usize
            || out.len() < extent.m as usize * extent.n as usize
        {
            return Err(KernelError::Launch(
                "operand tensors shorter than the problem requires".to_string(),
            ));
        }
        if !bias.is_absent() && bias.len() < problem.out_channels as usize {
            return Err(KernelError::Launch(
                "bias vector shorter than the output channel count".to_string(),
            ));
        }
        BasicConv2d {
            problem,
            input,
            weight,
            bias,
            out,
            l1_tile: self.l1_tile,
            l0_tile: self.l0_tile,
            swizzle_offset: self.swizzle_offset,
        }
        .run(core_count);
        Ok(())
    }
}

impl<E: Element> Default for Conv2dOperation<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_extents_follow_stride_and_padding() {
        let problem = Conv2dProblem {
            batch: 2,
            in_height: 8,
            in_width: 8,
            in_channels: 16,
            out_channels: 32,
            kernel_h: 3,
            kernel_w: 3,
            stride_h: 2,
            stride_w: 2,
            pad_h: 1,
            pad_w: 1,
        };
        assert_eq!(problem.out_height(), 4);
        assert_eq!(problem.out_width(), 4);
        assert_eq!(problem.gemm_extent(), GemmCoord::new(2 * 4 * 4, 32, 3 * 3 * 16));
    }

    #[test]
    fn degenerate_problems_are_rejected() {
        let operation = Conv2dOperation::<half::f16>::new();
        let mut problem = Conv2dProblem {
            batch: 1,
            in_height: 4,
            in_width: 4,
            in_channels: 8,
            out_channels: 8,
            kernel_h: 3,
            kernel_w: 3,
            stride_h: 1,
            stride_w: 1,
            pad_h: 0,
            pad_w: 0,
        };
        assert!(operation.can_implement(&problem).is_ok());
        problem.stride_h = 0;
        assert!(operation.can_implement(&problem).is_err());
        problem.stride_h = 1;
        problem.kernel_h = 8;
        assert!(operation.can_implement(&problem).is_err());
    }
}
