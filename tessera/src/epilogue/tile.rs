use crate::data_type::Element;

/// Element-wise vector ops over row-major tiles staged in UB. Tiles are
/// contiguous with stride equal to the column count; the block epilogues
/// size them that way.

/// Widens a staged tile to f32 for the compute pipeline.
pub struct TileElemWiseCast;

impl TileElemWiseCast {
    pub fn widen<E: Element>(&self, dst: &mut [f32], src: &[E], len: usize) {
        for index in 0..len {
            dst[index] = num_traits::cast(src[index]).unwrap_or(0.0);
        }
    }

    pub fn narrow<E: Element>(&self, dst: &mut [E], src: &[f32], len: usize) {
        for index in 0..len {
            dst[index] = num_traits::cast(src[index]).unwrap_or_else(E::zeroed);
        }
    }
}

/// Multiplies every row of a tile by a per-column vector.
pub struct TileRowBroadcastMul;

impl TileRowBroadcastMul {
    pub fn run(&self, tile: &mut [f32], vector: &[f32], rows: usize, columns: usize) {
        for row in 0..rows {
            for column in 0..columns {
                tile[row * columns + column] *= vector[column];
            }
        }
    }
}

/// Adds a per-column vector to every row of a tile.
pub struct TileRowBroadcastAdd;

impl TileRowBroadcastAdd {
    pub fn run(&self, tile: &mut [f32], vector: &[f32], rows: usize, columns: usize) {
        for row in 0..rows {
            for column in 0..columns {
                tile[row * columns + column] += vector[column];
            }
        }
    }
}

/// Multiplies every column of a tile by a per-row vector.
pub struct TileColumnBroadcastMul;

impl TileColumnBroadcastMul {
    pub fn run(&self, tile: &mut [f32], vector: &[f32], rows: usize, columns: usize) {
        for row in 0..rows {
            for column in 0..columns {
                tile[row * columns + column] *= vector[row];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;

    #[test]
    fn broadcasts_follow_their_axis() {
        let mut tile = vec![1.0f32; 6];
        TileRowBroadcastMul.run(&mut tile, &[1.0, 2.0, 3.0], 2, 3);
        assert_eq!(tile, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
        TileColumnBroadcastMul.run(&mut tile, &[10.0, 100.0], 2, 3);
        assert_eq!(tile, vec![10.0, 20.0, 30.0, 100.0, 200.0, 300.0]);
        TileRowBroadcastAdd.run(&mut tile, &[1.0, 1.0, 1.0], 2, 3);
        assert_eq!(tile, vec![11.0, 21.0, 31.0, 101.0, 201.0, 301.0]);
    }

    #[test]
    fn cast_round_trips_through_f32() {
        let src = vec![f16::from_f32(1.5), f16::from_f32(-2.0)];
        let mut wide = vec![0.0f32; 2];
        TileElemWiseCast.widen(&mut wide, &src, 2);
        assert_eq!(wide, vec![1.5, -2.0]);
        let mut narrow = vec![f16::from_f32(0.0); 2];
        TileElemWiseCast.narrow(&mut narrow, &wide, 2);
        assert_eq!(narrow, src);
    }
}
