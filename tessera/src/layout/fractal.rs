use crate::{
    arch::{C0_NUM_PER_FRACTAL, ele_num_per_c0, ele_num_per_fractal},
    coord::{MatrixCoord, ceil_div, round_up},
    data_type::Element,
};

/// The hardware-mandated sub-tile arrangements. Lowercase letter describes
/// the order inside one fractal, uppercase the order between fractals:
/// `zN` is row-major inside / column-major between, `zZ` row/row,
/// `nZ` column/row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FractalKind {
    ZN,
    ZZ,
    NZ,
}

/// Four-level (shape, stride) descriptor of a fractal-tiled matrix:
/// dimension 0/1 split the rows into (rows inside fractal, fractal rows),
/// dimension 2/3 the columns likewise. Strides are in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FractalLayout {
    pub kind: FractalKind,
    pub org_shape: MatrixCoord,
    pub shape: [u32; 4],
    pub stride: [i64; 4],
}

impl FractalLayout {
    /// zN arrangement used for matrices staged in L1 and for the L0C
    /// accumulator.
    pub fn zn<E: Element>(org_rows: u32, org_cols: u32) -> Self {
        let per_c0 = ele_num_per_c0(E::DATA_TYPE.size_in_bytes());
        let per_fractal = ele_num_per_fractal(E::DATA_TYPE.size_in_bytes());
        let rows_round = round_up(org_rows, C0_NUM_PER_FRACTAL);
        let cols_round = round_up(org_cols, per_c0);
        Self {
            kind: FractalKind::ZN,
            org_shape: MatrixCoord::new(org_rows, org_cols),
            shape: [
                C0_NUM_PER_FRACTAL,
                rows_round / C0_NUM_PER_FRACTAL,
                per_c0,
                cols_round / per_c0,
            ],
            stride: [
                per_c0 as i64,
                per_fractal as i64,
                1,
                rows_round as i64 * per_c0 as i64,
            ],
        }
    }

    /// zZ arrangement required by the L0A operand buffer.
    pub fn zz<E: Element>(org_rows: u32, org_cols: u32) -> Self {
        let per_c0 = ele_num_per_c0(E::DATA_TYPE.size_in_bytes());
        let per_fractal = ele_num_per_fractal(E::DATA_TYPE.size_in_bytes());
        let rows_round = round_up(org_rows, C0_NUM_PER_FRACTAL);
        let cols_round = round_up(org_cols, per_c0);
        Self {
            kind: FractalKind::ZZ,
            org_shape: MatrixCoord::new(org_rows, org_cols),
            shape: [
                C0_NUM_PER_FRACTAL,
                rows_round / C0_NUM_PER_FRACTAL,
                per_c0,
                cols_round / per_c0,
            ],
            stride: [
                per_c0 as i64,
                cols_round as i64 * C0_NUM_PER_FRACTAL as i64,
                1,
                per_fractal as i64,
            ],
        }
    }

    /// nZ arrangement required by the L0B operand buffer.
    pub fn nz<E: Element>(org_rows: u32, org_cols: u32) -> Self {
        let per_c0 = ele_num_per_c0(E::DATA_TYPE.size_in_bytes());
        let per_fractal = ele_num_per_fractal(E::DATA_TYPE.size_in_bytes());
        let rows_round = round_up(org_rows, per_c0);
        let cols_round = round_up(org_cols, C0_NUM_PER_FRACTAL);
        Self {
            kind: FractalKind::NZ,
            org_shape: MatrixCoord::new(org_rows, org_cols),
            shape: [
                per_c0,
                rows_round / per_c0,
                C0_NUM_PER_FRACTAL,
                cols_round / C0_NUM_PER_FRACTAL,
            ],
            stride: [
                1,
                cols_round as i64 * per_c0 as i64,
                per_c0 as i64,
                per_fractal as i64,
            ],
        }
    }

    /// zN layout of the L0C accumulator, whose fractal is 16x16 elements
    /// regardless of accumulator width.
    pub fn zn_l0c(shape: MatrixCoord) -> Self {
        let f = C0_NUM_PER_FRACTAL;
        Self {
            kind: FractalKind::ZN,
            org_shape: shape,
            shape: [f, ceil_div(shape.row, f), f, ceil_div(shape.column, f)],
            stride: [
                f as i64,
                (f * f) as i64,
                1,
                round_up(shape.row, f) as i64 * f as i64,
            ],
        }
    }

    /// Linear element offset of a logical (row, column) coordinate.
    pub fn offset(&self, coord: MatrixCoord) -> i64 {
        let row = coord.row as i64;
        let col = coord.column as i64;
        let rows_in = self.shape[0] as i64;
        let cols_in = self.shape[2] as i64;
        (row / rows_in) * self.stride[1]
            + (row % rows_in) * self.stride[0]
            + (col / cols_in) * self.stride[3]
            + (col % cols_in) * self.stride[2]
    }

    /// Row extent rounded to whole fractals.
    pub fn rows_round(&self) -> u32 {
        self.shape[0] * self.shape[1]
    }

    /// Column extent rounded to whole fractals.
    pub fn cols_round(&self) -> u32 {
        self.shape[2] * self.shape[3]
    }

    /// Total elements the staged tile occupies, padding included.
    pub fn capacity(&self) -> usize {
        self.rows_round() as usize * self.cols_round() as usize
    }

    /// Layout of a sub-tile starting at a fractal-aligned coordinate:
    /// strides are preserved, only the extents shrink.
    pub fn tile(&self, shape: MatrixCoord) -> Self {
        Self {
            kind: self.kind,
            org_shape: shape,
            shape: [
                self.shape[0],
                ceil_div(shape.row, self.shape[0]),
                self.shape[2],
                ceil_div(shape.column, self.shape[2]),
            ],
            stride: self.stride,
        }
    }
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;

    #[test]
    fn zn_layout_is_a_bijection_over_the_rounded_tile() {
        let layout = FractalLayout::zn::<f16>(32, 32);
        let mut seen = vec![false; layout.capacity()];
        for r in 0..32 {
            for c in 0..32 {
                let off = layout.offset(MatrixCoord::new(r, c)) as usize;
                assert!(!seen[off], "offset {off} visited twice");
                seen[off] = true;
            }
        }
        assert!(seen.iter().all(|&v| v));
    }

    #[test]
    fn fractal_padding_rounds_up() {
        let layout = FractalLayout::zn::<f16>(17, 33);
        assert_eq!(layout.rows_round(), 32);
        assert_eq!(layout.cols_round(), 48);
        assert_eq!(layout.capacity(), 32 * 48);
    }

    #[test]
    fn zz_walks_fractal_rows_first() {
        let layout = FractalLayout::zz::<f16>(32, 32);
        // First element of the second fractal along the row.
        assert_eq!(layout.offset(MatrixCoord::new(0, 16)), 256);
        // First element of the second fractal down the column.
        assert_eq!(layout.offset(MatrixCoord::new(16, 0)), 512);
    }

    #[test]
    fn nz_is_column_major_inside_fractals() {
        let layout = FractalLayout::nz::<f16>(32, 32);
        assert_eq!(layout.offset(MatrixCoord::new(1, 0)), 1);
        assert_eq!(layout.offset(MatrixCoord::new(0, 1)), 16);
    }
}
