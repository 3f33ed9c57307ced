use crate::coord::MatrixCoord;

/// Row-major (shape, stride) descriptor for a matrix in linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowMajor {
    pub shape: MatrixCoord,
    /// Elements between adjacent rows (leading dimension).
    pub stride: i64,
}

impl RowMajor {
    pub const fn new(rows: u32, columns: u32) -> Self {
        Self {
            shape: MatrixCoord::new(rows, columns),
            stride: columns as i64,
        }
    }

    pub const fn with_stride(rows: u32, columns: u32, stride: i64) -> Self {
        Self {
            shape: MatrixCoord::new(rows, columns),
            stride,
        }
    }

    pub const fn offset(&self, coord: MatrixCoord) -> i64 {
        coord.row as i64 * self.stride + coord.column as i64
    }

    /// Layout of a tile at some offset of this matrix: same stride, tile
    /// shape.
    pub const fn tile(&self, shape: MatrixCoord) -> Self {
        Self {
            shape,
            stride: self.stride,
        }
    }

    pub const fn rows(&self) -> u32 {
        self.shape.row
    }

    pub const fn columns(&self) -> u32 {
        self.shape.column
    }
}

/// Column-major counterpart of [`RowMajor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMajor {
    pub shape: MatrixCoord,
    /// Elements between adjacent columns.
    pub stride: i64,
}

impl ColumnMajor {
    pub const fn new(rows: u32, columns: u32) -> Self {
        Self {
            shape: MatrixCoord::new(rows, columns),
            stride: rows as i64,
        }
    }

    pub const fn with_stride(rows: u32, columns: u32, stride: i64) -> Self {
        Self {
            shape: MatrixCoord::new(rows, columns),
            stride,
        }
    }

    pub const fn offset(&self, coord: MatrixCoord) -> i64 {
        coord.column as i64 * self.stride + coord.row as i64
    }

    pub const fn tile(&self, shape: MatrixCoord) -> Self {
        Self {
            shape,
            stride: self.stride,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_offsets() {
        let layout = RowMajor::new(4, 8);
        assert_eq!(layout.offset(MatrixCoord::new(0, 0)), 0);
        assert_eq!(layout.offset(MatrixCoord::new(2, 3)), 19);
        let tile = layout.tile(MatrixCoord::new(2, 2));
        assert_eq!(tile.stride, 8);
    }

    #[test]
    fn column_major_offsets() {
        let layout = ColumnMajor::new(4, 8);
        assert_eq!(layout.offset(MatrixCoord::new(2, 3)), 14);
    }
}
