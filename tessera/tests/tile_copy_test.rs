mod common;

use tessera::{
    coord::MatrixCoord,
    device::DeviceBuffer,
    gemm::tile::{CopyGmToL1, CopyL0cToGm, CopyL1ToL0A, CopyL1ToL0B},
    layout::{FractalLayout, RowMajor},
};

#[test]
fn f32_tile_survives_the_staging_chain_bit_exact() {
    let rows = 48u32;
    let columns = 40u32;
    let mut rng = common::rng(11);
    let host = common::random_f32(&mut rng, (rows * columns) as usize);
    let mut gm = DeviceBuffer::from_slice(&host);

    let layout_gm = RowMajor::new(rows, columns);
    let layout_l1 = FractalLayout::zn::<f32>(rows, columns);
    let mut l1 = vec![0.0f32; layout_l1.capacity()];
    CopyGmToL1::new().copy(&mut l1, &layout_l1, gm.tensor::<f32>(), &layout_gm);

    let layout_l0a = FractalLayout::zz::<f32>(rows, columns);
    let mut l0a = vec![0.0f32; layout_l0a.capacity()];
    let view = layout_l1.tile(MatrixCoord::new(rows, columns));
    CopyL1ToL0A::new().copy(&mut l0a, &layout_l0a, &l1, &view);

    let layout_l0b = FractalLayout::nz::<f32>(rows, columns);
    let mut l0b = vec![0.0f32; layout_l0b.capacity()];
    CopyL1ToL0B::new().copy(&mut l0b, &layout_l0b, &l1, &view);

    for row in 0..rows {
        for column in 0..columns {
            let coord = MatrixCoord::new(row, column);
            let want = host[(row * columns + column) as usize];
            assert_eq!(l1[layout_l1.offset(coord) as usize].to_bits(), want.to_bits());
            assert_eq!(l0a[layout_l0a.offset(coord) as usize].to_bits(), want.to_bits());
            assert_eq!(l0b[layout_l0b.offset(coord) as usize].to_bits(), want.to_bits());
        }
    }
}

#[test]
fn i32_accumulator_drain_is_bit_exact() {
    let shape = MatrixCoord::new(32, 48);
    let layout_l0c = FractalLayout::zn_l0c(shape);
    let mut l0c = vec![0i32; layout_l0c.capacity()];
    for row in 0..shape.row {
        for column in 0..shape.column {
            l0c[layout_l0c.offset(MatrixCoord::new(row, column)) as usize] =
                (row as i32) * 1000 - column as i32;
        }
    }

    let mut gm = DeviceBuffer::zeroed((shape.row * shape.column) as usize * 4);
    let layout_gm = RowMajor::new(shape.row, shape.column);
    CopyL0cToGm::<i32, RowMajor>::new().copy(gm.tensor::<i32>(), &layout_gm, &l0c, &layout_l0c);

    let result = gm.as_slice::<i32>();
    for row in 0..shape.row {
        for column in 0..shape.column {
            assert_eq!(
                result[(row * shape.column + column) as usize],
                (row as i32) * 1000 - column as i32
            );
        }
    }
}

#[test]
fn staged_padding_stays_zero_outside_the_tile() {
    let rows = 5u32;
    let columns = 7u32;
    let host: Vec<i32> = (1..=(rows * columns) as i32).collect();
    let mut gm = DeviceBuffer::from_slice(&host);

    let layout_l1 = FractalLayout::zn::<i32>(16, 16);
    let mut l1 = vec![-1i32; layout_l1.capacity()];
    CopyGmToL1::new().copy(
        &mut l1,
        &layout_l1,
        gm.tensor::<i32>(),
        &RowMajor::new(rows, columns),
    );

    for row in 0..16u32 {
        for column in 0..16u32 {
            let value = l1[layout_l1.offset(MatrixCoord::new(row, column)) as usize];
            if row < rows && column < columns {
                assert_eq!(value, host[(row * columns + column) as usize]);
            } else {
                assert_eq!(value, 0, "padding at ({row}, {column}) not zeroed");
            }
        }
    }
}
