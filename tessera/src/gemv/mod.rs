use std::marker::PhantomData;

use crate::{
    arch::{Resource, TileBuffer},
    coord::MatrixCoord,
    data_type::Element,
    device::{GlobalTensor, launch_aiv_only},
    error::KernelError,
    layout::RowMajor,
};

/// Columns of one row staged per UB pass. Two operand tiles of this length
/// fit any supported element type inside the UB budget with room to spare.
const COLUMN_TILE: usize = 8192;

/// Matrix-vector product `y = alpha * A * x + beta * y`, on the vector
/// cores alone; there is no K reuse to justify waking the matrix unit for
/// a single output column. Rows are dealt round-robin over every vector
/// core of the launch.
pub struct GemvAiv<E: Element> {
    pub a: GlobalTensor<E>,
    pub layout_a: RowMajor,
    pub x: GlobalTensor<E>,
    pub y: GlobalTensor<E>,
    pub alpha: f32,
    pub beta: f32,
}

struct GemvCore<E: Element> {
    ub_a: TileBuffer<E>,
    ub_x: TileBuffer<E>,
}

impl<E: Element> GemvCore<E> {
    fn new(resource: &mut Resource) -> Self {
        Self {
            ub_a: resource.ub.alloc(COLUMN_TILE),
            ub_x: resource.ub.alloc(COLUMN_TILE),
        }
    }

    fn dot_row(&mut self, params: &GemvAiv<E>, row: u32) -> f32 {
        let columns = params.layout_a.columns() as usize;
        let ub_a = self.ub_a.as_mut_slice();
        let ub_x = self.ub_x.as_mut_slice();
        let mut acc = 0.0f32;
        let mut column = 0usize;
        while column < columns {
            let chunk = COLUMN_TILE.min(columns - column);
            for index in 0..chunk {
                let coord = MatrixCoord::new(row, (column + index) as u32);
                ub_a[index] = params.a.read(params.layout_a.offset(coord));
                ub_x[index] = params.x.read((column + index) as i64);
            }
            for index in 0..chunk {
                let a: f32 = num_traits::cast(ub_a[index]).unwrap_or(0.0);
                let x: f32 = num_traits::cast(ub_x[index]).unwrap_or(0.0);
                acc += a * x;
            }
            column += chunk;
        }
        acc
    }
}

impl<E: Element> GemvAiv<E> {
    pub fn run(&self, pair_count: usize) {
        launch_aiv_only(pair_count, |context, _hub| {
            let mut resource = Resource::new();
            let mut core = GemvCore::new(&mut resource);
            let rows = self.layout_a.rows();
            let mut row = context.aiv_index() as u32;
            while row < rows {
                let acc = core.dot_row(self, row);
                let y: f32 = num_traits::cast(self.y.read(row as i64)).unwrap_or(0.0);
                let value = self.alpha * acc + self.beta * y;
                self.y
                    .write(row as i64, num_traits::cast(value).unwrap_or_else(E::zeroed));
                row += context.aiv_count() as u32;
            }
        });
    }
}

/// Host-side handle of the matrix-vector pipeline.
pub struct GemvOperation<E: Element> {
    _marker: PhantomData<E>,
}

impl<E: Element> GemvOperation<E> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn can_implement(&self, layout_a: &RowMajor) -> Result<(), KernelError> {
        if layout_a.rows() == 0 || layout_a.columns() == 0 {
            return Err(KernelError::UnsupportedConfiguration(
                "matrix extents must be non-zero".to_string(),
            ));
        }
        if layout_a.stride < layout_a.columns() as i64 {
            return Err(KernelError::UnsupportedConfiguration(format!(
                "leading stride {} is below the row extent {}",
                layout_a.stride,
                layout_a.columns(),
            )));
        }
        Ok(())
    }

    pub fn workspace_size(&self) -> usize {
        0
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        pair_count: usize,
        a: GlobalTensor<E>,
        layout_a: RowMajor,
        x: GlobalTensor<E>,
        y: GlobalTensor<E>,
        alpha: f32,
        beta: f32,
    ) -> Result<(), KernelError> {
        self.can_implement(&layout_a)?;
        if x.len() < layout_a.columns() as usize {
            return Err(KernelError::Launch("x vector shorter than N".to_string()));
        }
        if y.len() < layout_a.rows() as usize {
            return Err(KernelError::Launch("y vector shorter than M".to_string()));
        }
        GemvAiv {
            a,
            layout_a,
            x,
            y,
            alpha,
            beta,
        }
        .run(pair_count);
        Ok(())
    }
}

impl<E: Element> Default for GemvOperation<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;
    use crate::device::DeviceBuffer;

    #[test]
    fn rows_larger_than_one_ub_pass_accumulate_correctly() {
        let m = 3u32;
        let n = (COLUMN_TILE + 17) as u32;
        let a_host: Vec<f32> = (0..m * n).map(|i| ((i % 7) as f32) * 0.25).collect();
        let x_host: Vec<f32> = (0..n).map(|i| ((i % 5) as f32) - 2.0).collect();
        let mut a = DeviceBuffer::from_slice(&a_host);
        let mut x = DeviceBuffer::from_slice(&x_host);
        let mut y = DeviceBuffer::from_slice(&vec![1.0f32; m as usize]);

        let operation = GemvOperation::<f32>::new();
        operation
            .run(
                2,
                a.tensor(),
                RowMajor::new(m, n),
                x.tensor(),
                y.tensor(),
                2.0,
                -1.0,
            )
            .unwrap();

        for row in 0..m as usize {
            let mut expected = 0.0f32;
            for column in 0..n as usize {
                expected += a_host[row * n as usize + column] * x_host[column];
            }
            expected = 2.0 * expected - 1.0;
            let got = y.as_slice::<f32>()[row];
            assert!((got - expected).abs() <= expected.abs() * 1e-5 + 1e-3);
        }
    }

    #[test]
    fn half_precision_rows_round_to_f32_accumulation() {
        let m = 4u32;
        let n = 64u32;
        let a_host: Vec<f16> = (0..m * n).map(|i| f16::from_f32((i % 3) as f32)).collect();
        let x_host: Vec<f16> = (0..n).map(|_| f16::from_f32(0.5)).collect();
        let mut a = DeviceBuffer::from_slice(&a_host);
        let mut x = DeviceBuffer::from_slice(&x_host);
        let mut y = DeviceBuffer::zeroed(m as usize * 2);

        GemvOperation::<f16>::new()
            .run(
                1,
                a.tensor(),
                RowMajor::new(m, n),
                x.tensor(),
                y.tensor(),
                1.0,
                0.0,
            )
            .unwrap();

        for row in 0..m as usize {
            let mut expected = 0.0f32;
            for column in 0..n as usize {
                expected += a_host[row * n as usize + column].to_f32() * 0.5;
            }
            assert_eq!(y.as_slice::<f16>()[row], f16::from_f32(expected));
        }
    }
}
