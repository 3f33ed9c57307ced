mod common;

use tessera::{
    coord::{GemmCoord, MatrixCoord, ceil_div},
    gemm::block::{
        BlockScheduler, IdentityBlockScheduler, L2TileScheduler, L2_TILE_THRESHOLD,
        MAX_SPLIT_TILE_NUM, MIN_SPLIT_TILE_NUM, SwizzleDirection,
    },
};

/// Distinct blocks visited; panics on any duplicate assignment.
fn coverage(scheduler: &impl BlockScheduler) -> std::collections::HashSet<(u32, u32)> {
    let mut seen = std::collections::HashSet::new();
    for task in 0..scheduler.core_loops() {
        let block = scheduler.block_coord(task);
        assert!(
            seen.insert((block.m, block.n)),
            "block ({}, {}) scheduled twice",
            block.m,
            block.n
        );
    }
    seen
}

#[test]
fn four_cores_take_one_block_each_on_a_square_grid() {
    // 256^3 problem over 128^2 tiles: exactly four blocks for four cores.
    let scheduler = IdentityBlockScheduler::new(
        GemmCoord::new(256, 256, 256),
        MatrixCoord::new(128, 128),
        1,
        SwizzleDirection::Zn,
    );
    assert_eq!(scheduler.core_loops(), 4);

    let cores = 4u32;
    let mut per_core = vec![Vec::new(); cores as usize];
    for core in 0..cores {
        let mut task = core;
        while task < scheduler.core_loops() {
            per_core[core as usize].push(scheduler.block_coord(task));
            task += cores;
        }
    }
    let mut all: Vec<_> = per_core
        .iter()
        .inspect(|tasks| assert_eq!(tasks.len(), 1))
        .flatten()
        .map(|block| (block.m, block.n))
        .collect();
    all.sort_unstable();
    assert_eq!(all, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
}

#[test]
fn boundary_tiles_appear_exactly_once_and_cover_the_problem() {
    // 17x33 over 16x16 tiles: one tail row strip and one tail column strip.
    let problem = GemmCoord::new(17, 33, 64);
    let scheduler = IdentityBlockScheduler::new(
        problem,
        MatrixCoord::new(16, 16),
        2,
        SwizzleDirection::Zn,
    );
    assert_eq!(scheduler.core_loops(), 2 * 3);

    let mut area = 0u64;
    let mut tail_rows = 0;
    let mut tail_columns = 0;
    for task in 0..scheduler.core_loops() {
        let block = scheduler.block_coord(task);
        let actual = scheduler.actual_block_shape(block);
        assert!(actual.m > 0 && actual.n > 0);
        area += actual.m as u64 * actual.n as u64;
        if actual.m == 1 {
            tail_rows += 1;
        }
        if actual.n == 1 {
            tail_columns += 1;
        }
    }
    assert_eq!(area, 17 * 33);
    // Three blocks in the tail row, two in the tail column.
    assert_eq!(tail_rows, 3);
    assert_eq!(tail_columns, 2);
    assert_eq!(coverage(&scheduler).len(), 6);
}

/// Replicates the super-block factorization search: descending extents,
/// footprint under the threshold, minimal tail conflict under the same
/// joint ordering the device-side search uses.
fn reference_split(
    problem: GemmCoord,
    tile: MatrixCoord,
    block_num: u32,
    elem_bytes: usize,
    trans_a: bool,
    trans_b: bool,
) -> (u32, u32) {
    let m_tile_num = ceil_div(problem.m, tile.row);
    let n_tile_num = ceil_div(problem.n, tile.column);
    let total = |m: u32, n: u32, k: u32| {
        (m as usize * k as usize + k as usize * n as usize + m as usize * n as usize) * elem_bytes
    };
    let tail = |total: u32, normal: u32| {
        if total % normal == 0 { normal } else { total % normal }
    };

    let (inner_bad, max_i, max_j) = if tile.column > tile.row {
        (trans_a, block_num.min(n_tile_num), block_num.min(m_tile_num))
    } else {
        (!trans_b, block_num.min(m_tile_num), block_num.min(n_tile_num))
    };
    let inner_min = if inner_bad { MAX_SPLIT_TILE_NUM } else { MIN_SPLIT_TILE_NUM };

    let mut best = (0u32, 0u32);
    let mut m_conflict = u32::MAX;
    let mut n_conflict = u32::MAX;
    let mut i = max_i;
    while i >= MIN_SPLIT_TILE_NUM {
        let mut j = max_j;
        while j >= inner_min {
            let m_tiles = if tile.column > tile.row { j } else { i };
            let n_tiles = if tile.column > tile.row { i } else { j };
            if total(m_tiles * tile.row, n_tiles * tile.column, problem.k) <= L2_TILE_THRESHOLD {
                let m_here = ceil_div(block_num, tail(m_tile_num, m_tiles));
                let n_here = ceil_div(block_num, tail(n_tile_num, n_tiles));
                if m_conflict >= m_here && n_conflict >= n_here {
                    m_conflict = m_here;
                    n_conflict = n_here;
                    best = (m_tiles, n_tiles);
                }
            }
            j -= 1;
        }
        i -= 1;
    }
    best
}

#[test]
fn oversized_grid_factorization_matches_the_reference_search() {
    // 16x16 tile grid with a footprint far past the threshold.
    let problem = GemmCoord::new(4096, 4096, 8192);
    let tile = MatrixCoord::new(256, 256);
    let block_num = 24u32;
    let scheduler = L2TileScheduler::new(problem, tile, block_num, 2, false, false);

    let (m_tiles, n_tiles) = reference_split(problem, tile, block_num, 2, false, false);
    assert_ne!((m_tiles, n_tiles), (0, 0));
    assert_eq!(scheduler.super_tile_extent(), MatrixCoord::new(m_tiles, n_tiles));
    assert_eq!(
        scheduler.super_grid(),
        MatrixCoord::new(ceil_div(16, m_tiles), ceil_div(16, n_tiles))
    );

    // The re-blocked walk still visits every tile exactly once.
    assert_eq!(coverage(&scheduler).len(), 16 * 16);
}

#[test]
fn sub_threshold_problems_keep_the_plain_walk() {
    let scheduler = L2TileScheduler::new(
        GemmCoord::new(1024, 1024, 512),
        MatrixCoord::new(128, 256),
        20,
        2,
        false,
        false,
    );
    assert_eq!(scheduler.super_grid(), MatrixCoord::new(1, 1));
}
