pub const fn ceil_div(value: u32, divisor: u32) -> u32 {
    (value + divisor - 1) / divisor
}

pub const fn round_up(value: u32, alignment: u32) -> u32 {
    ceil_div(value, alignment) * alignment
}

/// Coordinate in the (row, column) plane of a single matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MatrixCoord {
    pub row: u32,
    pub column: u32,
}

impl MatrixCoord {
    pub const fn new(row: u32, column: u32) -> Self {
        Self {
            row,
            column,
        }
    }

    pub const fn count(&self) -> u64 {
        self.row as u64 * self.column as u64
    }
}

/// Logical (M, N, K) extent of one GEMM problem, or of one tile of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GemmCoord {
    pub m: u32,
    pub n: u32,
    pub k: u32,
}

impl GemmCoord {
    pub const fn new(m: u32, n: u32, k: u32) -> Self {
        Self {
            m,
            n,
            k,
        }
    }

    pub const fn mn(&self) -> MatrixCoord {
        MatrixCoord::new(self.m, self.n)
    }

    pub const fn mk(&self) -> MatrixCoord {
        MatrixCoord::new(self.m, self.k)
    }

    pub const fn kn(&self) -> MatrixCoord {
        MatrixCoord::new(self.k, self.n)
    }
}
