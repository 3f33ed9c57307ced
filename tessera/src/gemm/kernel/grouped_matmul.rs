use bytemuck::{Pod, Zeroable};

use crate::{
    arch::Resource,
    coord::{GemmCoord, MatrixCoord},
    data_type::Element,
    device::{DeviceBuffer, GlobalTensor, launch_aic_only},
    gemm::block::{BlockMmad, BlockScheduler, IdentityBlockScheduler, SwizzleDirection},
    layout::RowMajor,
};

/// Upper bound on the number of problems one grouped launch may carry;
/// the packed shape list must stay small enough to unpack at kernel entry.
pub const MAX_GROUP_COUNT: usize = 64;

/// One problem of a grouped launch, as packed into the device-resident
/// shape list.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GroupShape {
    pub m: u32,
    pub n: u32,
    pub k: u32,
    reserved: u32,
}

impl GroupShape {
    pub fn new(m: u32, n: u32, k: u32) -> Self {
        Self {
            m,
            n,
            k,
            reserved: 0,
        }
    }

    pub fn coord(&self) -> GemmCoord {
        GemmCoord::new(self.m, self.n, self.k)
    }
}

/// Device-resident packed list of group shapes. The host packs it once
/// with [`GroupList::pack`]; every core unpacks the same bytes at kernel
/// entry, so the group walk is identical across cores without any
/// launch-argument marshalling per group.
#[derive(Clone, Copy)]
pub struct GroupList {
    bytes: GlobalTensor<i8>,
    count: u32,
}

impl GroupList {
    pub fn pack(shapes: &[GroupShape]) -> DeviceBuffer {
        assert!(shapes.len() <= MAX_GROUP_COUNT);
        DeviceBuffer::from_slice::<i8>(bytemuck::cast_slice(shapes))
    }

    pub fn new(bytes: GlobalTensor<i8>, count: u32) -> Self {
        debug_assert!(count as usize <= MAX_GROUP_COUNT);
        Self { bytes, count }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    fn unpack(&self) -> Vec<GroupShape> {
        let stride = std::mem::size_of::<GroupShape>();
        (0..self.count as usize)
            .map(|group| {
                let mut raw = [0u8; std::mem::size_of::<GroupShape>()];
                for (index, byte) in raw.iter_mut().enumerate() {
                    *byte = self.bytes.read((group * stride + index) as i64) as u8;
                }
                bytemuck::pod_read_unaligned(&raw)
            })
            .collect()
    }
}

/// Grouped pipeline: one launch computes many independent problems over
/// shared operand arenas. The serpentine walk restarts per group, but the
/// first task of each group is assigned to the core after the one that
/// took the previous group's last task, so tail-block imbalance does not
/// pile onto core zero.
pub struct GroupedMatmul<EIn: Element, EOut: Element> {
    pub groups: GroupList,
    pub a: GlobalTensor<EIn>,
    pub b: GlobalTensor<EIn>,
    pub c: GlobalTensor<EOut>,
    pub l1_tile: GemmCoord,
    pub l0_tile: GemmCoord,
    pub swizzle_offset: u32,
    pub direction: SwizzleDirection,
}

impl<EIn, EOut> GroupedMatmul<EIn, EOut>
where
    EIn: Element,
    EOut: Element<Accumulator = EIn::Accumulator>,
{
    pub fn run(&self, core_count: usize) {
        launch_aic_only(core_count, |context, _hub| {
            let shapes = self.groups.unpack();
            let mut resource = Resource::new();
            let mut block_mmad = BlockMmad::<EIn, EOut, RowMajor, RowMajor>::new(
                &mut resource,
                self.l1_tile,
                self.l0_tile,
            );

            let core = context.pair_index as u32;
            let core_num = context.pair_count as u32;
            let mut start_core = 0u32;
            let mut offset_a = 0i64;
            let mut offset_b = 0i64;
            let mut offset_c = 0i64;
            for shape in &shapes {
                let problem = shape.coord();
                let layout_a = RowMajor::new(problem.m, problem.k);
                let layout_b = RowMajor::new(problem.k, problem.n);
                let layout_c = RowMajor::new(problem.m, problem.n);
                let scheduler = IdentityBlockScheduler::new(
                    problem,
                    MatrixCoord::new(self.l1_tile.m, self.l1_tile.n),
                    self.swizzle_offset,
                    self.direction,
                );
                let core_loops = scheduler.core_loops();

                let start_loop = if core < start_core {
                    core + core_num - start_core
                } else {
                    core - start_core
                };
                let mut task = start_loop;
                while task < core_loops {
                    let block = scheduler.block_coord(task);
                    let actual = scheduler.actual_block_shape(block);
                    let block_origin =
                        MatrixCoord::new(block.m * self.l1_tile.m, block.n * self.l1_tile.n);

                    block_mmad.run(
                        self.a
                            .at(offset_a + layout_a.offset(MatrixCoord::new(block_origin.row, 0))),
                        &layout_a,
                        self.b.at(
                            offset_b + layout_b.offset(MatrixCoord::new(0, block_origin.column)),
                        ),
                        &layout_b,
                        self.c.at(offset_c + layout_c.offset(block_origin)),
                        &layout_c,
                        actual,
                    );
                    task += core_num;
                }

                start_core = (start_core + core_loops) % core_num;
                offset_a += problem.m as i64 * problem.k as i64;
                offset_b += problem.k as i64 * problem.n as i64;
                offset_c += problem.m as i64 * problem.n as i64;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_list_round_trips_through_device_bytes() {
        let shapes = [
            GroupShape::new(64, 128, 32),
            GroupShape::new(1, 1, 1),
            GroupShape::new(300, 200, 96),
        ];
        let mut packed = GroupList::pack(&shapes);
        let list = GroupList::new(packed.tensor(), shapes.len() as u32);
        assert_eq!(list.unpack(), shapes);
    }

    #[test]
    fn start_core_carry_rotates_across_groups() {
        // 5 blocks on 4 cores: the next group starts on core 1.
        let core_num = 4u32;
        let mut start_core = 0u32;
        for core_loops in [5u32, 3, 8] {
            start_core = (start_core + core_loops) % core_num;
        }
        assert_eq!(start_core, (5 + 3 + 8) % 4);
    }
}
