#![allow(dead_code)]

use half::f16;
use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_f16(rng: &mut StdRng, len: usize) -> Vec<f16> {
    (0..len)
        .map(|_| f16::from_f32(rng.random_range(-1.0f32..1.0)))
        .collect()
}

pub fn random_f32(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

pub fn random_i8(rng: &mut StdRng, len: usize) -> Vec<i8> {
    (0..len).map(|_| rng.random_range(-8i32..8) as i8).collect()
}

pub fn widen_f16(values: &[f16], rows: usize, columns: usize) -> Array2<f32> {
    Array2::from_shape_vec((rows, columns), values.iter().map(|v| v.to_f32()).collect())
        .unwrap()
}

pub fn widen_f32(values: &[f32], rows: usize, columns: usize) -> Array2<f32> {
    Array2::from_shape_vec((rows, columns), values.to_vec()).unwrap()
}

/// Sequential k-ascending accumulate in f32, the same association the
/// device pipeline uses, so f32 comparisons can be tight.
pub fn matmul_reference(a: &Array2<f32>, b: &Array2<f32>) -> Array2<f32> {
    let (m, k) = a.dim();
    let n = b.dim().1;
    assert_eq!(b.dim().0, k);
    let mut c = Array2::zeros((m, n));
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0f32;
            for p in 0..k {
                acc += a[[i, p]] * b[[p, j]];
            }
            c[[i, j]] = acc;
        }
    }
    c
}

/// Integer accumulate reference of the quantized pipeline.
pub fn matmul_reference_i32(a: &[i8], b: &[i8], m: usize, n: usize, k: usize) -> Vec<i32> {
    let mut c = vec![0i32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0i32;
            for p in 0..k {
                acc += a[i * k + p] as i32 * b[p * n + j] as i32;
            }
            c[i * n + j] = acc;
        }
    }
    c
}

pub fn assert_close(got: f32, want: f32, tolerance: f32, context: &str) {
    let scale = want.abs().max(1.0);
    assert!(
        (got - want).abs() <= tolerance * scale,
        "{context}: got {got}, want {want}"
    );
}
