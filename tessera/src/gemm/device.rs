use std::marker::PhantomData;

use crate::{
    coord::{GemmCoord, MatrixCoord},
    data_type::{DataType, Element},
    device::GlobalTensor,
    error::KernelError,
    gemm::{
        block::{AnyBlockScheduler, BlockMmad, SwizzleDirection},
        kernel::{BasicMatmul, GroupList, GroupShape, GroupedMatmul, MatmulEpilogue, QuantMatmul},
        tile::LinearLayout,
    },
    layout::{LayoutKind, RowMajor},
};

fn check_positive(problem: GemmCoord) -> Result<(), KernelError> {
    if problem.m == 0 || problem.n == 0 || problem.k == 0 {
        return Err(KernelError::InvalidShape {
            shape: problem,
            reason: "every extent must be non-zero".to_string(),
        });
    }
    Ok(())
}

fn check_layout<L: LinearLayout>(
    layout: &L,
    expected: MatrixCoord,
    operand: &str,
) -> Result<(), KernelError> {
    if layout.shape() != expected {
        return Err(KernelError::UnsupportedConfiguration(format!(
            "{operand} layout shape {:?} does not match the problem extent {expected:?}",
            layout.shape(),
        )));
    }
    let contiguous = match L::KIND {
        LayoutKind::RowMajor => layout.shape().column as i64,
        LayoutKind::ColumnMajor => layout.shape().row as i64,
    };
    if layout.leading_stride() < contiguous {
        return Err(KernelError::UnsupportedConfiguration(format!(
            "{operand} leading stride {} is below the contiguous extent {contiguous}",
            layout.leading_stride(),
        )));
    }
    Ok(())
}

/// Elements a layout's view must be able to address.
fn required_len<L: LinearLayout>(layout: &L) -> usize {
    let shape = layout.shape();
    if shape.row == 0 || shape.column == 0 {
        return 0;
    }
    layout.offset(MatrixCoord::new(shape.row - 1, shape.column - 1)) as usize + 1
}

fn check_tensor<E: Element, L: LinearLayout>(
    tensor: &GlobalTensor<E>,
    layout: &L,
    operand: &str,
) -> Result<(), KernelError> {
    if tensor.len() < required_len(layout) {
        return Err(KernelError::Launch(format!(
            "{operand} tensor holds {} elements, layout addresses {}",
            tensor.len(),
            required_len(layout),
        )));
    }
    Ok(())
}

const fn is_transposed(kind: LayoutKind) -> bool {
    matches!(kind, LayoutKind::ColumnMajor)
}

/// Block tiling and walk order of one device-level operation. The defaults
/// are the profile the matrix unit sustains on f16 operands; callers with
/// unusual aspect ratios override them.
#[derive(Debug, Clone, Copy)]
pub struct TileConfig {
    pub l1_tile: GemmCoord,
    pub l0_tile: GemmCoord,
    pub swizzle_offset: u32,
    pub direction: SwizzleDirection,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            l1_tile: GemmCoord::new(128, 256, 256),
            l0_tile: GemmCoord::new(128, 256, 64),
            swizzle_offset: 3,
            direction: SwizzleDirection::Zn,
        }
    }
}

/// Host-side handle of the store-direct pipeline: validates a problem,
/// reports its workspace demand (none) and launches [`BasicMatmul`].
pub struct MatmulOperation<EIn: Element, EOut: Element, LA: LinearLayout, LB: LinearLayout> {
    pub config: TileConfig,
    _marker: PhantomData<(EIn, EOut, LA, LB)>,
}

impl<EIn, EOut, LA, LB> MatmulOperation<EIn, EOut, LA, LB>
where
    EIn: Element,
    EOut: Element<Accumulator = EIn::Accumulator>,
    LA: LinearLayout,
    LB: LinearLayout,
{
    pub fn new(config: TileConfig) -> Self {
        Self {
            config,
            _marker: PhantomData,
        }
    }

    pub fn can_implement(
        &self,
        problem: GemmCoord,
        layout_a: &LA,
        layout_b: &LB,
        layout_c: &RowMajor,
    ) -> Result<(), KernelError> {
        check_positive(problem)?;
        check_layout(layout_a, problem.mk(), "A")?;
        check_layout(layout_b, problem.kn(), "B")?;
        check_layout(layout_c, problem.mn(), "C")?;
        if !BlockMmad::<EIn, EOut, LA, LB>::can_implement(self.config.l1_tile, self.config.l0_tile)
        {
            return Err(KernelError::UnsupportedConfiguration(
                "block tiles overflow the staging memories".to_string(),
            ));
        }
        Ok(())
    }

    pub fn workspace_size(&self, _problem: GemmCoord) -> usize {
        0
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        core_count: usize,
        problem: GemmCoord,
        a: GlobalTensor<EIn>,
        layout_a: LA,
        b: GlobalTensor<EIn>,
        layout_b: LB,
        c: GlobalTensor<EOut>,
        layout_c: RowMajor,
    ) -> Result<(), KernelError> {
        self.can_implement(problem, &layout_a, &layout_b, &layout_c)?;
        check_tensor(&a, &layout_a, "A")?;
        check_tensor(&b, &layout_b, "B")?;
        check_tensor(&c, &layout_c, "C")?;

        let scheduler = AnyBlockScheduler::select(
            problem,
            MatrixCoord::new(self.config.l1_tile.m, self.config.l1_tile.n),
            core_count as u32,
            EIn::DATA_TYPE.size_in_bytes(),
            is_transposed(LA::KIND),
            is_transposed(LB::KIND),
            self.config.swizzle_offset,
            self.config.direction,
        );
        BasicMatmul {
            a,
            layout_a,
            b,
            layout_b,
            c,
            layout_c,
            scheduler,
            l1_tile: self.config.l1_tile,
            l0_tile: self.config.l0_tile,
        }
        .run(core_count);
        Ok(())
    }
}

/// Host-side handle of the split pipeline `D = alpha * A * B + beta * C`.
pub struct MatmulEpilogueOperation<E: Element, LA: LinearLayout, LB: LinearLayout> {
    pub config: TileConfig,
    _marker: PhantomData<(E, LA, LB)>,
}

impl<E, LA, LB> MatmulEpilogueOperation<E, LA, LB>
where
    E: Element,
    LA: LinearLayout,
    LB: LinearLayout,
{
    pub fn new(config: TileConfig) -> Self {
        Self {
            config,
            _marker: PhantomData,
        }
    }

    pub fn can_implement(
        &self,
        problem: GemmCoord,
        layout_a: &LA,
        layout_b: &LB,
        layout_c: &RowMajor,
        layout_d: &RowMajor,
    ) -> Result<(), KernelError> {
        check_positive(problem)?;
        check_layout(layout_a, problem.mk(), "A")?;
        check_layout(layout_b, problem.kn(), "B")?;
        check_layout(layout_c, problem.mn(), "C")?;
        check_layout(layout_d, problem.mn(), "D")?;
        if !BlockMmad::<E, E, LA, LB>::can_implement(self.config.l1_tile, self.config.l0_tile) {
            return Err(KernelError::UnsupportedConfiguration(
                "block tiles overflow the staging memories".to_string(),
            ));
        }
        Ok(())
    }

    /// The matrix cores stage every output block here before the vector
    /// cores fold it with C.
    pub fn workspace_size(&self, problem: GemmCoord) -> usize {
        problem.m as usize * problem.n as usize * E::DATA_TYPE.size_in_bytes()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        pair_count: usize,
        problem: GemmCoord,
        a: GlobalTensor<E>,
        layout_a: LA,
        b: GlobalTensor<E>,
        layout_b: LB,
        c: GlobalTensor<E>,
        layout_c: RowMajor,
        d: GlobalTensor<E>,
        layout_d: RowMajor,
        workspace: GlobalTensor<E>,
        alpha: f32,
        beta: f32,
    ) -> Result<(), KernelError> {
        self.can_implement(problem, &layout_a, &layout_b, &layout_c, &layout_d)?;
        check_tensor(&a, &layout_a, "A")?;
        check_tensor(&b, &layout_b, "B")?;
        check_tensor(&c, &layout_c, "C")?;
        check_tensor(&d, &layout_d, "D")?;
        let required = self.workspace_size(problem);
        let provided = workspace.len() * E::DATA_TYPE.size_in_bytes();
        if provided < required {
            return Err(KernelError::Workspace { required, provided });
        }

        let scheduler = AnyBlockScheduler::select(
            problem,
            MatrixCoord::new(self.config.l1_tile.m, self.config.l1_tile.n),
            pair_count as u32,
            E::DATA_TYPE.size_in_bytes(),
            is_transposed(LA::KIND),
            is_transposed(LB::KIND),
            self.config.swizzle_offset,
            self.config.direction,
        );
        MatmulEpilogue {
            problem,
            a,
            layout_a,
            b,
            layout_b,
            workspace,
            c,
            layout_c,
            d,
            layout_d,
            alpha,
            beta,
            scheduler,
            l1_tile: self.config.l1_tile,
            l0_tile: self.config.l0_tile,
        }
        .run(pair_count);
        Ok(())
    }
}

/// Host-side handle of the quantized pipeline: i8 operands, i32 workspace,
/// dequantizing vector-core epilogue.
pub struct QuantMatmulOperation<EOut: Element, LA: LinearLayout, LB: LinearLayout> {
    pub config: TileConfig,
    _marker: PhantomData<(EOut, LA, LB)>,
}

impl<EOut, LA, LB> QuantMatmulOperation<EOut, LA, LB>
where
    EOut: Element,
    LA: LinearLayout,
    LB: LinearLayout,
{
    pub fn new(config: TileConfig) -> Self {
        Self {
            config,
            _marker: PhantomData,
        }
    }

    pub fn can_implement(
        &self,
        problem: GemmCoord,
        layout_a: &LA,
        layout_b: &LB,
        layout_d: &RowMajor,
    ) -> Result<(), KernelError> {
        check_positive(problem)?;
        if !matches!(EOut::DATA_TYPE, DataType::F16 | DataType::BF16 | DataType::F32) {
            return Err(KernelError::UnsupportedDataType(EOut::DATA_TYPE));
        }
        check_layout(layout_a, problem.mk(), "A")?;
        check_layout(layout_b, problem.kn(), "B")?;
        check_layout(layout_d, problem.mn(), "D")?;
        if !BlockMmad::<i8, i32, LA, LB>::can_implement(self.config.l1_tile, self.config.l0_tile) {
            return Err(KernelError::UnsupportedConfiguration(
                "block tiles overflow the staging memories".to_string(),
            ));
        }
        Ok(())
    }

    pub fn workspace_size(&self, problem: GemmCoord) -> usize {
        problem.m as usize * problem.n as usize * DataType::I32.size_in_bytes()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        pair_count: usize,
        problem: GemmCoord,
        a: GlobalTensor<i8>,
        layout_a: LA,
        b: GlobalTensor<i8>,
        layout_b: LB,
        d: GlobalTensor<EOut>,
        layout_d: RowMajor,
        workspace: GlobalTensor<i32>,
        scale: GlobalTensor<f32>,
        per_token_scale: GlobalTensor<f32>,
        bias: GlobalTensor<f32>,
    ) -> Result<(), KernelError> {
        self.can_implement(problem, &layout_a, &layout_b, &layout_d)?;
        check_tensor(&a, &layout_a, "A")?;
        check_tensor(&b, &layout_b, "B")?;
        check_tensor(&d, &layout_d, "D")?;
        if scale.len() < problem.n as usize {
            return Err(KernelError::Launch("scale vector shorter than N".to_string()));
        }
        if per_token_scale.len() < problem.m as usize {
            return Err(KernelError::Launch(
                "per-token scale vector shorter than M".to_string(),
            ));
        }
        if !bias.is_absent() && bias.len() < problem.n as usize {
            return Err(KernelError::Launch("bias vector shorter than N".to_string()));
        }
        let required = self.workspace_size(problem);
        let provided = workspace.len() * DataType::I32.size_in_bytes();
        if provided < required {
            return Err(KernelError::Workspace { required, provided });
        }

        let scheduler = AnyBlockScheduler::select(
            problem,
            MatrixCoord::new(self.config.l1_tile.m, self.config.l1_tile.n),
            pair_count as u32,
            DataType::I8.size_in_bytes(),
            is_transposed(LA::KIND),
            is_transposed(LB::KIND),
            self.config.swizzle_offset,
            self.config.direction,
        );
        QuantMatmul {
            problem,
            a,
            layout_a,
            b,
            layout_b,
            workspace,
            d,
            layout_d,
            scale,
            per_token_scale,
            bias,
            scheduler,
            l1_tile: self.config.l1_tile,
            l0_tile: self.config.l0_tile,
        }
        .run(pair_count);
        Ok(())
    }
}

/// Host-side handle of the grouped pipeline: validates every group shape
/// against the shared arenas, packs nothing itself (the caller owns the
/// packed list), and launches [`GroupedMatmul`].
pub struct GroupedMatmulOperation<EIn: Element, EOut: Element> {
    pub config: TileConfig,
    _marker: PhantomData<(EIn, EOut)>,
}

impl<EIn, EOut> GroupedMatmulOperation<EIn, EOut>
where
    EIn: Element,
    EOut: Element<Accumulator = EIn::Accumulator>,
{
    pub fn new(config: TileConfig) -> Self {
        Self {
            config,
            _marker: PhantomData,
        }
    }

    pub fn can_implement(&self, shapes: &[GroupShape]) -> Result<(), KernelError> {
        if shapes.is_empty() || shapes.len() > super::kernel::MAX_GROUP_COUNT {
            return Err(KernelError::UnsupportedConfiguration(format!(
                "group count {} outside 1..={}",
                shapes.len(),
                super::kernel::MAX_GROUP_COUNT,
            )));
        }
        for shape in shapes {
            check_positive(shape.coord())?;
        }
        if !BlockMmad::<EIn, EOut, RowMajor, RowMajor>::can_implement(
            self.config.l1_tile,
            self.config.l0_tile,
        ) {
            return Err(KernelError::UnsupportedConfiguration(
                "block tiles overflow the staging memories".to_string(),
            ));
        }
        Ok(())
    }

    pub fn workspace_size(&self, _shapes: &[GroupShape]) -> usize {
        0
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        core_count: usize,
        shapes: &[GroupShape],
        groups: GroupList,
        a: GlobalTensor<EIn>,
        b: GlobalTensor<EIn>,
        c: GlobalTensor<EOut>,
    ) -> Result<(), KernelError> {
        self.can_implement(shapes)?;
        let mut need_a = 0usize;
        let mut need_b = 0usize;
        let mut need_c = 0usize;
        for shape in shapes {
            need_a += shape.m as usize * shape.k as usize;
            need_b += shape.k as usize * shape.n as usize;
            need_c += shape.m as usize * shape.n as usize;
        }
        if a.len() < need_a || b.len() < need_b || c.len() < need_c {
            return Err(KernelError::Launch(
                "operand arenas shorter than the packed group shapes require".to_string(),
            ));
        }

        GroupedMatmul {
            groups,
            a,
            b,
            c,
            l1_tile: self.config.l1_tile,
            l0_tile: self.config.l0_tile,
            swizzle_offset: self.config.swizzle_offset,
            direction: self.config.direction,
        }
        .run(core_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;
    use crate::layout::ColumnMajor;

    #[test]
    fn zero_extent_problems_are_rejected() {
        let operation =
            MatmulOperation::<f16, f16, RowMajor, RowMajor>::new(TileConfig::default());
        let problem = GemmCoord::new(128, 0, 64);
        let result = operation.can_implement(
            problem,
            &RowMajor::new(128, 64),
            &RowMajor::new(64, 0),
            &RowMajor::new(128, 0),
        );
        assert!(matches!(result, Err(KernelError::InvalidShape { .. })));
    }

    #[test]
    fn mismatched_layout_shapes_are_rejected() {
        let operation =
            MatmulOperation::<f16, f16, RowMajor, ColumnMajor>::new(TileConfig::default());
        let problem = GemmCoord::new(64, 64, 64);
        let result = operation.can_implement(
            problem,
            &RowMajor::new(64, 32),
            &ColumnMajor::new(64, 64),
            &RowMajor::new(64, 64),
        );
        assert!(matches!(
            result,
            Err(KernelError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn undersized_strides_are_rejected() {
        let operation =
            MatmulOperation::<f16, f16, RowMajor, RowMajor>::new(TileConfig::default());
        let problem = GemmCoord::new(64, 64, 64);
        let result = operation.can_implement(
            problem,
            &RowMajor::with_stride(64, 64, 32),
            &RowMajor::new(64, 64),
            &RowMajor::new(64, 64),
        );
        assert!(matches!(
            result,
            Err(KernelError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn epilogue_workspace_is_the_full_output() {
        let operation =
            MatmulEpilogueOperation::<f16, RowMajor, RowMajor>::new(TileConfig::default());
        assert_eq!(
            operation.workspace_size(GemmCoord::new(256, 512, 64)),
            256 * 512 * 2
        );
        let quant = QuantMatmulOperation::<f16, RowMajor, RowMajor>::new(TileConfig::default());
        assert_eq!(quant.workspace_size(GemmCoord::new(256, 512, 64)), 256 * 512 * 4);
    }

    #[test]
    fn grouped_shapes_are_bounded() {
        let operation = GroupedMatmulOperation::<f16, f16>::new(TileConfig::default());
        assert!(operation.can_implement(&[]).is_err());
        let shapes = vec![GroupShape::new(16, 16, 16); super::super::kernel::MAX_GROUP_COUNT + 1];
        assert!(operation.can_implement(&shapes).is_err());
        assert!(operation.can_implement(&[GroupShape::new(64, 64, 64)]).is_ok());
    }
}
