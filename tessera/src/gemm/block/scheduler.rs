use crate::coord::{GemmCoord, MatrixCoord, ceil_div};

/// L2-resident footprint above which the tile walk is re-blocked.
pub const L2_TILE_THRESHOLD: usize = 100 * 1024 * 1024;
pub const MIN_SPLIT_TILE_NUM: u32 = 4;
pub const MAX_SPLIT_TILE_NUM: u32 = 8;

/// Maps a flat task index to the block it computes. Implementations trade
/// reuse patterns, not results: every task index in `0..core_loops` must
/// map to a distinct block and all blocks must be covered.
pub trait BlockScheduler {
    fn core_loops(&self) -> u32;
    fn block_coord(&self, task_index: u32) -> GemmCoord;
    fn actual_block_shape(&self, block: GemmCoord) -> GemmCoord;
}

/// Which axis consecutive task indices sweep fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwizzleDirection {
    /// Column-fastest within a band of rows.
    Zn,
    /// Row-fastest within a band of columns.
    Nz,
}

/// Serpentine block walk: tasks sweep `swizzle_offset` rows (or columns)
/// at a time, reversing direction on every other band so consecutive
/// blocks share one operand panel.
#[derive(Debug, Clone, Copy)]
pub struct IdentityBlockScheduler {
    pub problem: GemmCoord,
    pub tile_mn: MatrixCoord,
    pub loops_mn: MatrixCoord,
    pub swizzle_offset: u32,
    pub direction: SwizzleDirection,
}

impl IdentityBlockScheduler {
    pub fn new(
        problem: GemmCoord,
        tile_mn: MatrixCoord,
        swizzle_offset: u32,
        direction: SwizzleDirection,
    ) -> Self {
        debug_assert!(swizzle_offset > 0);
        Self {
            problem,
            tile_mn,
            loops_mn: MatrixCoord::new(
                ceil_div(problem.m, tile_mn.row),
                ceil_div(problem.n, tile_mn.column),
            ),
            swizzle_offset,
            direction,
        }
    }
}

impl BlockScheduler for IdentityBlockScheduler {
    fn core_loops(&self) -> u32 {
        self.loops_mn.row * self.loops_mn.column
    }

    fn block_coord(&self, task_index: u32) -> GemmCoord {
        let inner = task_index % self.core_loops();
        let loops = self.loops_mn;
        let offset = self.swizzle_offset;
        match self.direction {
            SwizzleDirection::Zn => {
                let band_count = ceil_div(loops.row, offset);
                let band = inner / (offset * loops.column);
                let in_band = inner % (offset * loops.column);
                let rows = if band == band_count - 1 {
                    loops.row - offset * band
                } else {
                    offset
                };
                let m = band * offset + in_band % rows;
                let mut n = in_band / rows;
                if band % 2 == 1 {
                    n = loops.column - n - 1;
                }
                GemmCoord::new(m, n, 0)
            },
            SwizzleDirection::Nz => {
                let band_count = ceil_div(loops.column, offset);
                let band = inner / (offset * loops.row);
                let in_band = inner % (offset * loops.row);
                let columns = if band == band_count - 1 {
                    loops.column - offset * band
                } else {
                    offset
                };
                let mut m = in_band / columns;
                let n = band * offset + in_band % columns;
                if band % 2 == 1 {
                    m = loops.row - m - 1;
                }
                GemmCoord::new(m, n, 0)
            },
        }
    }

    fn actual_block_shape(&self, block: GemmCoord) -> GemmCoord {
        let m = if block.m == self.loops_mn.row - 1 {
            self.problem.m - block.m * self.tile_mn.row
        } else {
            self.tile_mn.row
        };
        let n = if block.n == self.loops_mn.column - 1 {
            self.problem.n - block.n * self.tile_mn.column
        } else {
            self.tile_mn.column
        };
        GemmCoord::new(m, n, self.problem.k)
    }
}

fn tail_num(total: u32, normal: u32) -> u32 {
    if normal == 0 {
        return 0;
    }
    if total % normal == 0 {
        normal
    } else {
        total % normal
    }
}

fn lcm(m: u32, n: u32) -> u32 {
    if m == 0 || n == 0 {
        return 0;
    }
    let total = m as u64 * n as u64;
    let mut a = m;
    let mut b = n;
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    (total / a as u64) as u32
}

/// Block walk for problems whose operands overflow the L2 cache: the tile
/// grid is split into L2-sized super-blocks, and within each super-block
/// the per-core start columns are staggered so cores do not fetch the same
/// operand panel in the same cycle.
#[derive(Debug, Clone, Copy)]
pub struct L2TileScheduler {
    pub problem: GemmCoord,
    pub tile_mn: MatrixCoord,
    pub loops_mn: MatrixCoord,
    m_tile_num: u32,
    n_tile_num: u32,
    block_num: u32,
    elem_bytes: usize,
    trans_a: bool,
    trans_b: bool,
    m_l2_tile_num: u32,
    n_l2_tile_num: u32,
    m_l2_num: u32,
    n_l2_num: u32,
}

/// Resolved position of one task inside the super-block decomposition.
struct L2Position {
    new_block_index: u32,
    m_l2_index: u32,
    n_l2_index: u32,
    m_l2_tiles: u32,
    n_l2_tiles: u32,
}

impl L2TileScheduler {
    pub fn new(
        problem: GemmCoord,
        tile_mn: MatrixCoord,
        block_num: u32,
        elem_bytes: usize,
        trans_a: bool,
        trans_b: bool,
    ) -> Self {
        let loops_mn = MatrixCoord::new(
            ceil_div(problem.m, tile_mn.row),
            ceil_div(problem.n, tile_mn.column),
        );
        let mut scheduler = Self {
            problem,
            tile_mn,
            loops_mn,
            m_tile_num: loops_mn.row,
            n_tile_num: loops_mn.column,
            block_num,
            elem_bytes,
            trans_a,
            trans_b,
            m_l2_tile_num: 0,
            n_l2_tile_num: 0,
            m_l2_num: 0,
            n_l2_num: 0,
        };
        scheduler.init_l2_tile();
        scheduler
    }

    fn total_size(&self, m: u32, n: u32, k: u32) -> usize {
        let size_a = m as usize * k as usize * self.elem_bytes;
        let size_b = k as usize * n as usize * self.elem_bytes;
        let size_c = m as usize * n as usize * self.elem_bytes;
        size_a + size_b + size_c
    }

    fn l2_tile_enabled(&self) -> bool {
        self.total_size(self.problem.m, self.problem.n, self.problem.k) > L2_TILE_THRESHOLD
    }

    fn init_l2_tile(&mut self) {
        if (self.m_tile_num < MIN_SPLIT_TILE_NUM && self.n_tile_num < MIN_SPLIT_TILE_NUM)
            || !self.l2_tile_enabled()
        {
            self.m_l2_tile_num = self.m_tile_num;
            self.n_l2_tile_num = self.n_tile_num;
            self.m_l2_num = 1;
            self.n_l2_num = 1;
            return;
        }

        self.init_l2_tile_split();

        self.m_l2_num = ceil_div(self.m_tile_num, self.m_l2_tile_num);
        self.n_l2_num = ceil_div(self.n_tile_num, self.n_l2_tile_num);
    }

    /// Searches the factorization space for the super-block extents with
    /// the fewest same-panel conflicts on the tail super-blocks.
    fn init_l2_tile_split(&mut self) {
        let mut m_conflict = u32::MAX;
        let mut n_conflict = u32::MAX;
        let l1_m = self.tile_mn.row;
        let l1_n = self.tile_mn.column;

        // The wider tile direction streams better, so the narrow one gets
        // the stricter lower bound when its operand walk is strided.
        let (inner_bad, max_i, max_j) = if l1_n > l1_m {
            (
                self.trans_a,
                self.block_num.min(self.n_tile_num),
                self.block_num.min(self.m_tile_num),
            )
        } else {
            (
                !self.trans_b,
                self.block_num.min(self.m_tile_num),
                self.block_num.min(self.n_tile_num),
            )
        };
        let inner_min = if inner_bad {
            MAX_SPLIT_TILE_NUM
        } else {
            MIN_SPLIT_TILE_NUM
        };

        let mut i = max_i;
        while i >= MIN_SPLIT_TILE_NUM {
            let mut j = max_j;
            while j >= inner_min {
                let m_tiles = if l1_n > l1_m { j } else { i };
                let n_tiles = if l1_n > l1_m { i } else { j };
                if self.total_size(m_tiles * l1_m, n_tiles * l1_n, self.problem.k)
                    <= L2_TILE_THRESHOLD
                {
                    let m_tail = tail_num(self.m_tile_num, m_tiles);
                    let n_tail = tail_num(self.n_tile_num, n_tiles);
                    let m_conflict_here = ceil_div(self.block_num, m_tail);
                    let n_conflict_here = ceil_div(self.block_num, n_tail);
                    if m_conflict >= m_conflict_here && n_conflict >= n_conflict_here {
                        m_conflict = m_conflict_here;
                        n_conflict = n_conflict_here;
                        self.m_l2_tile_num = m_tiles;
                        self.n_l2_tile_num = n_tiles;
                    }
                }
                j -= 1;
            }
            i -= 1;
        }
        if self.m_l2_tile_num == 0 || self.n_l2_tile_num == 0 {
            self.m_l2_tile_num = self.m_tile_num;
            self.n_l2_tile_num = self.n_tile_num;
        }
    }

    /// Chosen super-block extent, in tiles per axis.
    pub fn super_tile_extent(&self) -> MatrixCoord {
        MatrixCoord::new(self.m_l2_tile_num, self.n_l2_tile_num)
    }

    /// Super-block grid dimensions.
    pub fn super_grid(&self) -> MatrixCoord {
        MatrixCoord::new(self.m_l2_num, self.n_l2_num)
    }

    fn position(&self, task_index: u32) -> L2Position {
        let per_batch = self.n_tile_num * self.m_tile_num;
        let tile_index = task_index % per_batch;

        let m_l2_index = tile_index / (self.m_l2_tile_num * self.n_tile_num);
        let m_l2_tiles = if m_l2_index == self.m_l2_num - 1 {
            tail_num(self.m_tile_num, self.m_l2_tile_num)
        } else {
            self.m_l2_tile_num
        };

        let n_l2_index =
            (tile_index % (self.m_l2_tile_num * self.n_tile_num)) / (m_l2_tiles * self.n_l2_tile_num);
        let n_l2_tiles = if n_l2_index == self.n_l2_num - 1 {
            tail_num(self.n_tile_num, self.n_l2_tile_num)
        } else {
            self.n_l2_tile_num
        };

        let start = m_l2_index * self.m_l2_tile_num * self.n_tile_num
            + n_l2_index * self.n_l2_tile_num * m_l2_tiles;
        L2Position {
            new_block_index: tile_index - start,
            m_l2_index,
            n_l2_index,
            m_l2_tiles,
            n_l2_tiles,
        }
    }
}

impl BlockScheduler for L2TileScheduler {
    fn core_loops(&self) -> u32 {
        self.loops_mn.row * self.loops_mn.column
    }

    fn block_coord(&self, task_index: u32) -> GemmCoord {
        let position = self.position(task_index);

        let m = position.new_block_index % position.m_l2_tiles
            + position.m_l2_index * self.m_l2_tile_num;

        // Stagger the column walk by one every lcm period so that cores
        // assigned consecutive tasks start on different operand panels.
        let mut n = 0;
        if position.n_l2_tiles != 0 {
            let period = lcm(position.m_l2_tiles, position.n_l2_tiles);
            let shift = position.new_block_index / period;
            n = (position.new_block_index + shift) % position.n_l2_tiles;
        }
        n += position.n_l2_index * self.n_l2_tile_num;

        GemmCoord::new(m, n, 0)
    }

    fn actual_block_shape(&self, block: GemmCoord) -> GemmCoord {
        let tail_m = if self.problem.m % self.tile_mn.row == 0 {
            self.tile_mn.row
        } else {
            self.problem.m % self.tile_mn.row
        };
        let tail_n = if self.problem.n % self.tile_mn.column == 0 {
            self.tile_mn.column
        } else {
            self.problem.n % self.tile_mn.column
        };
        let m = if block.m == self.m_tile_num - 1 {
            tail_m
        } else {
            self.tile_mn.row
        };
        let n = if block.n == self.n_tile_num - 1 {
            tail_n
        } else {
            self.tile_mn.column
        };
        GemmCoord::new(m, n, self.problem.k)
    }
}

/// Runtime scheduler selection: problems whose operands fit in L2 keep the
/// serpentine walk, larger ones get the super-block decomposition.
#[derive(Debug, Clone, Copy)]
pub enum AnyBlockScheduler {
    Identity(IdentityBlockScheduler),
    L2Tile(L2TileScheduler),
}

impl AnyBlockScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn select(
        problem: GemmCoord,
        tile_mn: MatrixCoord,
        block_num: u32,
        elem_bytes: usize,
        trans_a: bool,
        trans_b: bool,
        swizzle_offset: u32,
        direction: SwizzleDirection,
    ) -> Self {
        let footprint = (problem.m as usize * problem.k as usize
            + problem.k as usize * problem.n as usize
            + problem.m as usize * problem.n as usize)
            * elem_bytes;
        if footprint > L2_TILE_THRESHOLD {
            Self::L2Tile(L2TileScheduler::new(
                problem, tile_mn, block_num, elem_bytes, trans_a, trans_b,
            ))
        } else {
            Self::Identity(IdentityBlockScheduler::new(
                problem,
                tile_mn,
                swizzle_offset,
                direction,
            ))
        }
    }
}

impl BlockScheduler for AnyBlockScheduler {
    fn core_loops(&self) -> u32 {
        match self {
            Self::Identity(scheduler) => scheduler.core_loops(),
            Self::L2Tile(scheduler) => scheduler.core_loops(),
        }
    }

    fn block_coord(&self, task_index: u32) -> GemmCoord {
        match self {
            Self::Identity(scheduler) => scheduler.block_coord(task_index),
            Self::L2Tile(scheduler) => scheduler.block_coord(task_index),
        }
    }

    fn actual_block_shape(&self, block: GemmCoord) -> GemmCoord {
        match self {
            Self::Identity(scheduler) => scheduler.actual_block_shape(block),
            Self::L2Tile(scheduler) => scheduler.actual_block_shape(block),
        }
    }
}
